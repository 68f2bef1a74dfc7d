//! US state and territory code utilities.
//!
//! Provides mappings between two-letter postal codes and full names for
//! the 50 US states, DC, and the inhabited US territories.

/// Two-letter codes and full names for the 50 states + DC.
pub const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Two-letter codes and full names for the inhabited US territories.
pub const TERRITORIES: &[(&str, &str)] = &[
    ("AS", "American Samoa"),
    ("GU", "Guam"),
    ("MP", "Northern Mariana Islands"),
    ("PR", "Puerto Rico"),
    ("VI", "U.S. Virgin Islands"),
];

fn all_entries() -> impl Iterator<Item = &'static (&'static str, &'static str)> {
    STATES.iter().chain(TERRITORIES.iter())
}

/// Returns every known code (states, DC, territories) in table order.
#[must_use]
pub fn known_codes() -> Vec<&'static str> {
    all_entries().map(|(code, _)| *code).collect()
}

/// Maps a two-letter code to the full state or territory name.
///
/// Returns `None` for unrecognized codes.
#[must_use]
pub fn state_name(code: &str) -> Option<&'static str> {
    let code = code.trim().to_uppercase();
    all_entries()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Maps a full state or territory name (case-insensitive) to its code.
///
/// Returns `None` for unrecognized names.
#[must_use]
pub fn code_for_name(name: &str) -> Option<&'static str> {
    let name = name.trim();
    all_entries()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_count() {
        assert_eq!(STATES.len(), 51);
        assert_eq!(known_codes().len(), 56);
    }

    #[test]
    fn name_roundtrip() {
        for code in known_codes() {
            let name = state_name(code).unwrap();
            assert_eq!(code_for_name(name), Some(code), "roundtrip failed for {code}");
        }
    }

    #[test]
    fn territories_are_known() {
        assert_eq!(state_name("PR"), Some("Puerto Rico"));
        assert_eq!(code_for_name("guam"), Some("GU"));
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(state_name("XX"), None);
        assert_eq!(code_for_name("Atlantis"), None);
    }

    #[test]
    fn case_insensitive_lookup() {
        assert_eq!(state_name("ca"), Some("California"));
        assert_eq!(code_for_name("  NEW YORK "), Some("NY"));
    }
}
