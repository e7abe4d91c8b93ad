#[cfg(test)]
mod tests {
    use crate::config::{Config, OpenMode};
    use crate::status::Status;

    #[test]
    fn typed_setters_and_getters_round_trip() {
        let cfg = Config::new()
            .put_path("/tmp/pool")
            .put_size(1 << 20)
            .put_create_if_missing(true)
            .put_string("custom_option", "value")
            .put_uint("custom_number", 7)
            .put_bool("custom_flag", false);

        assert_eq!(cfg.get_string("path"), Some("/tmp/pool"));
        assert_eq!(cfg.get_uint("size"), Some(1 << 20));
        assert_eq!(cfg.get_bool("create_if_missing"), Some(true));
        assert_eq!(cfg.get_string("custom_option"), Some("value"));
        assert_eq!(cfg.get_uint("custom_number"), Some(7));
        assert_eq!(cfg.get_bool("custom_flag"), Some(false));
    }

    #[test]
    fn getters_do_not_cross_types() {
        let cfg = Config::new().put_string("size", "not a number");
        assert_eq!(cfg.get_uint("size"), None);
        assert_eq!(cfg.get_string("size"), Some("not a number"));
    }

    #[test]
    fn replacing_an_option_keeps_the_last_value() {
        let cfg = Config::new().put_size(1).put_size(2);
        assert_eq!(cfg.get_uint("size"), Some(2));
    }

    #[test]
    fn default_open_mode_requires_an_existing_pool() {
        let cfg = Config::new().put_path("/tmp/pool");
        assert_eq!(cfg.open_mode().unwrap(), OpenMode::OpenExisting);
    }

    #[test]
    fn create_if_missing_mode() {
        let cfg = Config::new().put_create_if_missing(true);
        assert_eq!(cfg.open_mode().unwrap(), OpenMode::CreateIfMissing);
    }

    #[test]
    fn create_or_error_wins_over_create_if_missing() {
        let cfg = Config::new()
            .put_create_if_missing(true)
            .put_create_or_error_if_exists(true);
        assert_eq!(cfg.open_mode().unwrap(), OpenMode::CreateOrErrorIfExists);
    }

    #[test]
    fn deprecated_force_create_is_an_alias() {
        #[allow(deprecated)]
        let cfg = Config::new().put_force_create(true);
        assert_eq!(cfg.open_mode().unwrap(), OpenMode::CreateOrErrorIfExists);
    }

    #[test]
    fn matching_alias_values_are_accepted() {
        #[allow(deprecated)]
        let cfg = Config::new()
            .put_create_or_error_if_exists(true)
            .put_force_create(true);
        assert_eq!(cfg.open_mode().unwrap(), OpenMode::CreateOrErrorIfExists);
    }

    #[test]
    fn conflicting_alias_values_are_rejected() {
        #[allow(deprecated)]
        let cfg = Config::new()
            .put_create_or_error_if_exists(true)
            .put_force_create(false);
        assert_eq!(cfg.open_mode().unwrap_err(), Status::InvalidArgument);
    }
}
