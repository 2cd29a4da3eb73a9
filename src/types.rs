// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// The six race/ethnicity categories reported by the surname reference file,
/// in the fixed column order used everywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaceEthnicity {
    White,
    Black,
    AsianPacificIslander,
    AmericanIndianAlaskaNative,
    Multiracial,
    Hispanic,
}

impl RaceEthnicity {
    pub const ALL: [RaceEthnicity; 6] = [
        RaceEthnicity::White,
        RaceEthnicity::Black,
        RaceEthnicity::AsianPacificIslander,
        RaceEthnicity::AmericanIndianAlaskaNative,
        RaceEthnicity::Multiracial,
        RaceEthnicity::Hispanic,
    ];

    /// Position of this category inside a six-field probability vector.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::White => 0,
            Self::Black => 1,
            Self::AsianPacificIslander => 2,
            Self::AmericanIndianAlaskaNative => 3,
            Self::Multiracial => 4,
            Self::Hispanic => 5,
        }
    }

    /// The surname-file column holding this category's percentage.
    pub fn column_name(self) -> &'static str {
        LAST_NAME_PROBABILITY_COLUMNS[self.index()]
    }
}

impl fmt::Display for RaceEthnicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Sex codes used by the per-year first-name files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn from_code(code: &str) -> Option<Sex> {
        match code.trim() {
            "F" | "f" => Some(Sex::Female),
            "M" | "m" => Some(Sex::Male),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Sex::Female => "F",
            Sex::Male => "M",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Output (and surname-file) column names for the race/ethnicity vector.
pub const LAST_NAME_PROBABILITY_COLUMNS: [&str; 6] = [
    "pctwhite",
    "pctblack",
    "pctapi",
    "pctaian",
    "pct2prace",
    "pcthispanic",
];

/// Output column names for the gender vector.
pub const FIRST_NAME_PROBABILITY_COLUMNS: [&str; 2] = ["pctfemale", "pctmale"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_index_matches_column_order() {
        for (i, category) in RaceEthnicity::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
            assert_eq!(category.column_name(), LAST_NAME_PROBABILITY_COLUMNS[i]);
        }
    }

    #[test]
    fn sex_codes_parse_case_insensitively() {
        assert_eq!(Sex::from_code("F"), Some(Sex::Female));
        assert_eq!(Sex::from_code(" m "), Some(Sex::Male));
        assert_eq!(Sex::from_code("X"), None);
    }
}
