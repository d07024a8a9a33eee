#[cfg(test)]
mod cron_utils_tests {
    use scheduler_dispatcher::cron_utils::*;

    use chrono::{TimeZone, Timelike, Utc};

    #[test]
    fn test_cron_scheduler_creation() {
        assert!(CronScheduler::new("*/5 * * * *").is_ok());
        assert!(CronScheduler::new("0 0 0 * * *").is_ok());
        assert!(CronScheduler::new("invalid").is_err());
    }

    #[test]
    fn test_five_field_expression_fires_on_minute_boundary() {
        let scheduler = CronScheduler::new("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 2, 30).unwrap();

        let next = scheduler.next_execution_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap());
        assert_eq!(scheduler.expression(), "*/5 * * * *");
    }

    #[test]
    fn test_next_execution_is_strictly_after() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();
        let on_boundary = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next = scheduler.next_execution_time(on_boundary).unwrap();
        assert_eq!(next.hour(), 13);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(CronScheduler::validate_cron_expression("0 9-17 * * 1-5").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("invalid").is_err());
        assert!(CronScheduler::validate_cron_expression("0 0 32 * *").is_err());
        assert!(CronScheduler::validate_cron_expression("").is_err());
    }

    #[test]
    fn test_upcoming_times() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();

        let upcoming = scheduler.upcoming_times(now, 3);

        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[1].hour(), 14);
        assert_eq!(upcoming[2].hour(), 15);
    }

    #[test]
    fn test_time_until_next_execution() {
        let scheduler = CronScheduler::new("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();

        let until = scheduler.time_until_next_execution(now).unwrap();
        assert_eq!(until.num_minutes(), 30);
    }

    #[test]
    fn test_next_run_after_swallows_invalid_expression() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert!(next_run_after("bogus", now).is_none());
        assert_eq!(
            next_run_after("15 * * * *", now),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 15, 0).unwrap())
        );
    }
}
