//! Night window

use chrono::{Local, Timelike};

/// Whether `hour` falls in the window `[start, end)`, which may wrap midnight
pub fn is_night_hour(hour: u32, start: u32, end: u32) -> bool {
    if start > end {
        hour >= start || hour < end
    } else {
        start <= hour && hour < end
    }
}

/// [`is_night_hour`] for the current local hour
pub fn is_night_time(start: u32, end: u32) -> bool {
    is_night_hour(Local::now().hour(), start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_across_midnight() {
        assert!(is_night_hour(23, 21, 6));
        assert!(is_night_hour(2, 21, 6));
        assert!(is_night_hour(21, 21, 6));
        assert!(!is_night_hour(6, 21, 6));
        assert!(!is_night_hour(12, 21, 6));
    }

    #[test]
    fn test_window_same_day() {
        assert!(is_night_hour(2, 1, 4));
        assert!(!is_night_hour(5, 1, 4));
        assert!(!is_night_hour(4, 1, 4));
    }

    #[test]
    fn test_empty_window() {
        for hour in 0..24 {
            assert!(!is_night_hour(hour, 5, 5));
        }
    }
}
