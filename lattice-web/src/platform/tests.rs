use super::*;

#[test]
fn from_name_accepts_known_platforms() {
    assert_eq!(Platform::from_name("generic"), Some(Platform::Generic));
    assert_eq!(Platform::from_name("synology"), Some(Platform::Synology));
    assert_eq!(Platform::from_name("qnap"), Some(Platform::Qnap));
    assert_eq!(Platform::from_name("Synology"), None);
    assert_eq!(Platform::from_name(""), None);
}

#[test]
fn display_round_trips_through_from_name() {
    for platform in [Platform::Generic, Platform::Synology, Platform::Qnap] {
        assert_eq!(Platform::from_name(platform.as_str()), Some(platform));
    }
}
