pub mod logging;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic, for real levels, garbage, or repeated calls
        logging::init("info");
        logging::init("DEBUG");
        logging::init("nonsense");
    }

    #[test]
    fn logging_init_honors_env_override() {
        std::env::set_var("TOPIQ_LOG", "trace");
        logging::init("info");
        std::env::remove_var("TOPIQ_LOG");
    }
}
