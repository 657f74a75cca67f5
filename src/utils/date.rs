use crate::error::FdaError;

const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const DATE_FORMATS: &str = "YYYYMMDD, YYYY-MM-DD, YYYY-MM, or YYYY";

fn is_leap_year(year: u32) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}

fn days_in(year: u32, month: u32) -> u32 {
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS_IN_MONTH[(month - 1) as usize] as u32
    }
}

fn all_digits(v: &str) -> bool {
    !v.is_empty() && v.chars().all(|c| c.is_ascii_digit())
}

/// Splits an accepted date into digits, leaving unspecified parts as `None`.
fn split_parts(v: &str) -> Option<(&str, Option<&str>, Option<&str>)> {
    if !v.is_ascii() {
        return None;
    }
    match v.len() {
        4 if all_digits(v) => Some((v, None, None)),
        7 if v.as_bytes()[4] == b'-' && all_digits(&v[..4]) && all_digits(&v[5..]) => {
            Some((&v[..4], Some(&v[5..7]), None))
        }
        8 if all_digits(v) => Some((&v[..4], Some(&v[4..6]), Some(&v[6..8]))),
        10 if v.as_bytes()[4] == b'-'
            && v.as_bytes()[7] == b'-'
            && all_digits(&v[..4])
            && all_digits(&v[5..7])
            && all_digits(&v[8..]) =>
        {
            Some((&v[..4], Some(&v[5..7]), Some(&v[8..10])))
        }
        _ => None,
    }
}

/// Normalizes a user date to the `YYYYMMDD` form openFDA range queries expect.
///
/// Partial dates expand to the start of the period, or to its end when
/// `end_of_period` is set (`2023` -> `20231231`).
pub(crate) fn to_yyyymmdd(value: &str, flag: &str, end_of_period: bool) -> Result<String, FdaError> {
    let v = value.trim();
    let Some((year, month, day)) = split_parts(v) else {
        return Err(FdaError::InvalidArgument(format!(
            "{flag} accepts {DATE_FORMATS}"
        )));
    };

    let year_num: u32 = year
        .parse()
        .map_err(|_| FdaError::InvalidArgument(format!("Invalid year in {flag}")))?;
    let month_num: u32 = match month {
        Some(m) => m
            .parse()
            .map_err(|_| FdaError::InvalidArgument(format!("Invalid month in {flag}")))?,
        None if end_of_period => 12,
        None => 1,
    };
    if !(1..=12).contains(&month_num) {
        return Err(FdaError::InvalidArgument(format!(
            "Invalid month {month_num} in {flag} (must be 01-12)"
        )));
    }

    let max_day = days_in(year_num, month_num);
    let day_num: u32 = match day {
        Some(d) => d
            .parse()
            .map_err(|_| FdaError::InvalidArgument(format!("Invalid day in {flag}")))?,
        None if end_of_period => max_day,
        None => 1,
    };
    if day_num < 1 || day_num > max_day {
        return Err(FdaError::InvalidArgument(format!(
            "Invalid day {day_num} for month {month_num} in {flag}"
        )));
    }

    Ok(format!("{year_num:04}{month_num:02}{day_num:02}"))
}

/// `YYYYMM` bucket key to `YYYY-MM`; anything else is returned unchanged.
pub(crate) fn format_month(bucket: &str) -> String {
    if bucket.len() == 6 && all_digits(bucket) {
        format!("{}-{}", &bucket[..4], &bucket[4..])
    } else {
        bucket.to_string()
    }
}
