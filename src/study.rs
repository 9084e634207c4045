//! Per-study plotting and analysis parameters
//!
//! Everything that differs between the stimulus sets lives in [`STUDIES`]:
//! condition relabeling, palette, axis bounds, behavioral measures and ERP
//! time windows. Analysis code looks a profile up by id instead of branching.

use anyhow::Result;

/// Studies whose tables are scored by the collector
pub const COLLECTED_STUDIES: &[&str] = &["adsbc21", "dbc19", "adbc23"];

/// Studies covered by the analysis binaries (includes the re-analysed dbc19)
pub const ANALYSED_STUDIES: &[&str] = &["adsbc21", "dbc19", "adbc23", "dbc19_corrected"];

/// Inclusive millisecond range of an ERP component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub name: &'static str,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn contains(&self, ms: i64) -> bool {
        (self.start_ms..=self.end_ms).contains(&ms)
    }
}

/// Condition code in the table and its plot legend label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionLabel {
    pub code: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudyProfile {
    pub id: &'static str,
    /// Study whose table is read (differs for re-analyses)
    pub source_id: &'static str,
    pub title: &'static str,
    /// Conditions in palette order
    pub conditions: &'static [ConditionLabel],
    /// CSS colour names or `#rrggbb`, one per condition
    pub palette: &'static [&'static str],
    pub x_max: f64,
    pub y_max: f64,
    /// Human measures correlated with surprisal
    pub behavioral_columns: &'static [&'static str],
    /// The ERP export lacks `Cloze`; carry it over from the stimulus table
    pub erp_needs_cloze: bool,
    pub windows: [TimeWindow; 2],
}

const DBC19_CONDITIONS: &[ConditionLabel] = &[
    ConditionLabel { code: "a", label: "A: Baseline" },
    ConditionLabel { code: "b", label: "B: Event-related violation" },
    ConditionLabel { code: "c", label: "C: Event-unrelated violation" },
];

const DBC19_WINDOWS: [TimeWindow; 2] = [
    TimeWindow { name: "N400", start_ms: 300, end_ms: 500 },
    TimeWindow { name: "P600", start_ms: 800, end_ms: 1000 },
];

pub const STUDIES: &[StudyProfile] = &[
    StudyProfile {
        id: "adsbc21",
        source_id: "adsbc21",
        title: "Aurnhammer et al. (2021)",
        conditions: &[
            ConditionLabel { code: "A", label: "A: A+E+" },
            ConditionLabel { code: "B", label: "B: A-E+" },
            ConditionLabel { code: "C", label: "C: A+E-" },
            ConditionLabel { code: "D", label: "D: A-E-" },
        ],
        palette: &["#000000", "#BB5566", "#004488", "#DDAA33"],
        x_max: 28.0,
        y_max: 0.06,
        behavioral_columns: &["Cloze", "Association_Noun"],
        erp_needs_cloze: false,
        windows: [
            TimeWindow { name: "N400", start_ms: 350, end_ms: 450 },
            TimeWindow { name: "P600", start_ms: 600, end_ms: 800 },
        ],
    },
    StudyProfile {
        id: "dbc19",
        source_id: "dbc19",
        title: "Delogu et al. (2019)",
        conditions: DBC19_CONDITIONS,
        palette: &["black", "red", "blue"],
        x_max: 44.0,
        y_max: 0.04,
        behavioral_columns: &["Cloze", "Association", "Plausibility"],
        erp_needs_cloze: true,
        windows: DBC19_WINDOWS,
    },
    StudyProfile {
        id: "dbc19_corrected",
        source_id: "dbc19",
        title: "Delogu et al. (2019)",
        conditions: DBC19_CONDITIONS,
        palette: &["black", "red", "blue"],
        x_max: 44.0,
        y_max: 0.04,
        behavioral_columns: &["Cloze", "Association", "Plausibility"],
        erp_needs_cloze: true,
        windows: DBC19_WINDOWS,
    },
    StudyProfile {
        id: "adbc23",
        source_id: "adbc23",
        title: "Aurnhammer et al. (2023)",
        conditions: &[
            ConditionLabel { code: "A", label: "A: Plausible" },
            ConditionLabel { code: "B", label: "B: Less plausible, attraction" },
            ConditionLabel { code: "C", label: "C: Implausible, no attraction" },
        ],
        palette: &["black", "red", "blue"],
        x_max: 21.0,
        y_max: 0.2,
        behavioral_columns: &["Cloze", "Plausibility"],
        erp_needs_cloze: false,
        windows: [
            TimeWindow { name: "N400", start_ms: 300, end_ms: 500 },
            TimeWindow { name: "P600", start_ms: 600, end_ms: 1000 },
        ],
    },
];

impl StudyProfile {
    /// Look up a study by id
    pub fn lookup(id: &str) -> Result<&'static StudyProfile> {
        STUDIES.iter().find(|s| s.id == id).ok_or_else(|| {
            let known: Vec<&str> = STUDIES.iter().map(|s| s.id).collect();
            anyhow::anyhow!("Unknown study '{id}'. Known: {}", known.join(", "))
        })
    }

    /// Legend label for a condition code (unknown codes are kept as is)
    pub fn relabel<'a>(&self, code: &'a str) -> &'a str {
        self.conditions
            .iter()
            .find(|c| c.code == code)
            .map_or(code, |c| c.label)
    }

    /// Palette entry for the `index`-th condition, cycling if short
    pub fn color(&self, index: usize) -> &'static str {
        self.palette[index % self.palette.len()]
    }

    pub fn window(&self, name: &str) -> Option<&TimeWindow> {
        self.windows.iter().find(|w| w.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_analysed_study_has_a_profile() {
        for id in ANALYSED_STUDIES {
            let profile = StudyProfile::lookup(id).unwrap();
            assert_eq!(profile.conditions.len(), profile.palette.len());
        }
        assert!(StudyProfile::lookup("xyz").is_err());
    }

    #[test]
    fn test_corrected_reanalysis_reads_dbc19() {
        let corrected = StudyProfile::lookup("dbc19_corrected").unwrap();
        assert_eq!(corrected.source_id, "dbc19");
        assert!(corrected.erp_needs_cloze);
    }

    #[test]
    fn test_relabel() {
        let dbc19 = StudyProfile::lookup("dbc19").unwrap();
        assert_eq!(dbc19.relabel("b"), "B: Event-related violation");
        assert_eq!(dbc19.relabel("z"), "z");
    }

    #[test]
    fn test_windows_are_inclusive() {
        let adbc23 = StudyProfile::lookup("adbc23").unwrap();
        let p600 = adbc23.window("P600").unwrap();
        assert!(p600.contains(600));
        assert!(p600.contains(1000));
        assert!(!p600.contains(1001));
        assert!(adbc23.window("P300").is_none());
    }
}
