//! TaskKind - the closed set of background work categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of background work. Determines which handler a record is
/// dispatched to; immutable once a record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    GeneratePdf,
    PurgeExpiredTickets,
    UpdateSitemap,
    ExportSearchResults,
    UpdateUsageStatistics,
    CreatePageRenditions,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::GeneratePdf,
        TaskKind::PurgeExpiredTickets,
        TaskKind::UpdateSitemap,
        TaskKind::ExportSearchResults,
        TaskKind::UpdateUsageStatistics,
        TaskKind::CreatePageRenditions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::GeneratePdf => "GENERATE_PDF",
            TaskKind::PurgeExpiredTickets => "PURGE_EXPIRED_TICKETS",
            TaskKind::UpdateSitemap => "UPDATE_SITEMAP",
            TaskKind::ExportSearchResults => "EXPORT_SEARCH_RESULTS",
            TaskKind::UpdateUsageStatistics => "UPDATE_USAGE_STATISTICS",
            TaskKind::CreatePageRenditions => "CREATE_PAGE_RENDITIONS",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind '{0}'")]
pub struct UnknownTaskKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    /// Case-insensitive; config layers tend to lowercase keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskKind::GeneratePdf, "GENERATE_PDF")]
    #[case(TaskKind::PurgeExpiredTickets, "PURGE_EXPIRED_TICKETS")]
    #[case(TaskKind::CreatePageRenditions, "CREATE_PAGE_RENDITIONS")]
    fn serde_name_matches_as_str(#[case] kind: TaskKind, #[case] name: &str) {
        assert_eq!(kind.as_str(), name);
        assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{name}\""));
    }

    #[rstest]
    #[case("UPDATE_SITEMAP", TaskKind::UpdateSitemap)]
    #[case("update_sitemap", TaskKind::UpdateSitemap)]
    #[case("Export_Search_Results", TaskKind::ExportSearchResults)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: TaskKind) {
        assert_eq!(input.parse::<TaskKind>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "REINDEX_EVERYTHING".parse::<TaskKind>().unwrap_err();
        assert_eq!(err, UnknownTaskKind("REINDEX_EVERYTHING".to_string()));
    }
}
