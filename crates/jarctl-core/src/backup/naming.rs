use chrono::NaiveDateTime;

use crate::errors::ManagerError;

/// `YYYY-MM-DD_HH-MM-SS`, appended to every backup name.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LAYOUT: &[u8] = b"dddd-dd-dd_dd-dd-dd";

pub const DEFAULT_BACKUP_NAME: &str = "backup";

pub fn validate_name(name: &str) -> Result<(), ManagerError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ManagerError::InvalidBackupName(name.to_string()))
    }
}

pub fn dir_name(name: &str, at: NaiveDateTime) -> String {
    format!("{name}_{}", at.format(TIMESTAMP_FORMAT))
}

/// Split `<name>_<timestamp>` on the layout alone; the timestamp is not
/// checked for being a real calendar date.
pub fn split_dir_name(dir_name: &str) -> Option<(&str, &str)> {
    let stamp_len = TIMESTAMP_LAYOUT.len();
    if dir_name.len() < stamp_len + 2 || !dir_name.is_char_boundary(dir_name.len() - stamp_len) {
        return None;
    }
    let (head, stamp) = dir_name.split_at(dir_name.len() - stamp_len);
    let name = head.strip_suffix('_')?;
    if name.is_empty() || !matches_layout(stamp) {
        return None;
    }
    Some((name, stamp))
}

/// True when `identifier` names one backup exactly rather than a prefix.
pub fn is_full_backup_name(identifier: &str) -> bool {
    split_dir_name(identifier).is_some()
}

pub fn parse_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

fn matches_layout(stamp: &str) -> bool {
    stamp.len() == TIMESTAMP_LAYOUT.len()
        && stamp
            .bytes()
            .zip(TIMESTAMP_LAYOUT)
            .all(|(actual, expected)| match expected {
                b'd' => actual.is_ascii_digit(),
                other => actual == *other,
            })
}
