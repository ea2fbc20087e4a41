use chrono::{DateTime, Duration, NaiveDate, Utc};
use trends_model::event::DATE_FORMAT;

/// Source of the current time. Reports and ingestion take their notion of "today" from here.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// `today - days_ago` as `yyyy-MM-dd`.
    pub fn date_string(&self, days_ago: i64) -> String {
        format_date(self.today() - Duration::days(days_ago))
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_dates() {
        let clock = Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap());
        assert_eq!("2024-03-01", clock.date_string(0));
        assert_eq!("2024-02-28", clock.date_string(2));
        assert_eq!("2024-03-02", clock.date_string(-1));
    }
}
