use crate::config::ExclusionSection;
use crate::watch::notify_info::NotifyInfo;
use regex::Regex;
use std::sync::LazyLock;

// Paths no user ever edits by hand; activity under them is churn.
const DEFAULT_MARKERS: [&str; 6] = [
    "$recycle.bin",
    "system volume information",
    "hiberfil.sys",
    "pagefile.sys",
    "swapfile.sys",
    "config.msi",
];

static APP_DATA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[/\\]users[/\\][^/\\]+[/\\]appdata[/\\]").expect("static pattern compiles")
});

static EDGE_BACKUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[/\\]users[/\\][^/\\]+[/\\]microsoftedgebackups[/\\]")
        .expect("static pattern compiles")
});

static NTUSER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[/\\]users[/\\][^/\\]+[/\\]ntuser\.(dat|ini|pol)")
        .expect("static pattern compiles")
});

/// Predicate over notification paths; anything it contains is dropped
/// before queueing and again at classification time. Immutable once
/// built, shared read-only across all volumes.
#[derive(Debug, Default)]
pub struct ExclusionRule {
    user_paths: Vec<String>,
    app_data: bool,
}

impl ExclusionRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(section: &ExclusionSection) -> Self {
        let mut rule = Self::new();
        rule.set_app_data(section.exclude_app_data);
        for prefix in &section.user_prefixes {
            rule.add_user_path(prefix.clone());
        }
        rule
    }

    pub fn set_app_data(&mut self, enabled: bool) {
        self.app_data = enabled;
    }

    pub fn add_user_path(&mut self, path: impl Into<String>) {
        self.user_paths.push(path.into().to_lowercase());
    }

    pub fn contains(&self, info: &NotifyInfo) -> bool {
        self.contains_path(&info.path().to_string_lossy())
    }

    pub fn contains_path(&self, path: &str) -> bool {
        if self.app_data && APP_DATA_PATTERN.is_match(path) {
            return true;
        }
        if self.is_default_path(path) {
            return true;
        }
        self.is_user_path(path)
    }

    fn is_default_path(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        if DEFAULT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return true;
        }
        EDGE_BACKUP_PATTERN.is_match(path) || NTUSER_PATTERN.is_match(path)
    }

    fn is_user_path(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.user_paths.iter().any(|p| lower.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::notify_info::RawAction;
    use std::path::PathBuf;

    fn info(path: &str) -> NotifyInfo {
        NotifyInfo::with_directory(PathBuf::from(path), RawAction::Added, false)
    }

    #[test]
    fn system_paths_are_excluded_case_insensitively() {
        let rule = ExclusionRule::new();
        assert!(rule.contains(&info(r"C:\$Recycle.Bin\S-1-5\x.txt")));
        assert!(rule.contains(&info(r"C:\System Volume Information\tracking.log")));
        assert!(rule.contains(&info(r"C:\HIBERFIL.SYS")));
        assert!(rule.contains(&info(r"C:\pagefile.sys")));
        assert!(rule.contains(&info(r"C:\Config.Msi\abc.rbs")));
    }

    #[test]
    fn app_data_excluded_only_when_enabled() {
        let mut rule = ExclusionRule::new();
        let p = info(r"C:\Users\alice\AppData\Local\Temp\x.tmp");
        assert!(!rule.contains(&p));
        rule.set_app_data(true);
        assert!(rule.contains(&p));
        // Unix-style separators match too.
        assert!(rule.contains(&info("/Users/alice/AppData/Roaming/x")));
    }

    #[test]
    fn edge_backups_and_registry_hives_are_excluded() {
        let rule = ExclusionRule::new();
        assert!(rule.contains(&info(r"C:\Users\bob\MicrosoftEdgeBackups\backup\1")));
        assert!(rule.contains(&info(r"C:\Users\bob\NTUSER.DAT")));
        assert!(rule.contains(&info(r"C:\Users\bob\ntuser.ini")));
        assert!(!rule.contains(&info(r"C:\Users\bob\ntuser.txt")));
    }

    #[test]
    fn user_paths_match_as_substrings() {
        let mut rule = ExclusionRule::new();
        rule.add_user_path(r"D:\Scratch");
        assert!(rule.contains(&info(r"d:\scratch\build\out.o")));
        assert!(!rule.contains(&info(r"D:\Work\report.docx")));
    }

    #[test]
    fn ordinary_documents_pass() {
        let mut rule = ExclusionRule::new();
        rule.set_app_data(true);
        assert!(!rule.contains(&info(r"C:\Users\alice\Documents\report.docx")));
        assert!(!rule.contains(&info("/home/alice/notes.txt")));
    }

    #[test]
    fn from_config_applies_both_knobs() {
        let section = ExclusionSection {
            exclude_app_data: true,
            user_prefixes: vec![String::from("/var/cache")],
        };
        let rule = ExclusionRule::from_config(&section);
        assert!(rule.contains(&info("/Users/x/AppData/y")));
        assert!(rule.contains(&info("/var/cache/apt/archives/p.deb")));
    }
}
