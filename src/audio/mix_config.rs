use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// `(from type, to type) → mix expression`, case-insensitive on both keys.
///
/// Filled once at startup; remappers only read from it.
#[derive(Debug, Default)]
pub struct MixConfigRepository {
    configs: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MixConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downmix/upmix expressions between the default layout types
    pub fn with_defaults() -> Self {
        let repo = Self::new();
        repo.register("mono", &["stereo"], "FL = FC | FR = FC");
        repo.register("mono", &["matrix"], "ML = FC | MR = FC");
        repo.register("stereo", &["mono"], "FC < FL + FR");
        repo.register("stereo", &["matrix"], "ML = FL | MR = FR");
        repo.register("matrix", &["stereo"], "FL = ML | FR = MR");
        repo.register(
            "5.1",
            &["stereo", "matrix"],
            "FL < FL + 0.707*FC + 0.707*BL | FR < FR + 0.707*FC + 0.707*BR \
             | ML < FL + 0.707*FC + 0.707*BL | MR < FR + 0.707*FC + 0.707*BR",
        );
        repo.register("5.1", &["mono"], "FC < FL + FR + 0.707*FC + 0.5*BL + 0.5*BR");
        repo.register("8ch", &["stereo"], "FL = L | FR = R");
        repo
    }

    pub fn register(&self, from_type: &str, to_types: &[&str], mix: &str) {
        let mut configs = self.configs.write();
        let targets = configs.entry(from_type.trim().to_uppercase()).or_default();

        for to_type in to_types.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            debug!("Registering mix config {} -> {}: {}", from_type, to_type, mix);
            targets.insert(to_type.to_uppercase(), mix.to_string());
        }
    }

    /// `to_types` is a comma separated list, as it appears in configuration
    pub fn register_csv(&self, from_type: &str, to_types: &str, mix: &str) {
        let targets: Vec<&str> = to_types.split(',').collect();
        self.register(from_type, &targets, mix);
    }

    pub fn get(&self, from_type: &str, to_type: &str) -> Option<String> {
        self.configs
            .read()
            .get(&from_type.to_uppercase())?
            .get(&to_type.to_uppercase())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_targets_are_trimmed_and_case_folded() {
        let repo = MixConfigRepository::new();
        repo.register_csv("5.1", " Stereo, matrix ,", "FL = FL | FR = FR");

        assert_eq!(repo.get("5.1", "STEREO").as_deref(), Some("FL = FL | FR = FR"));
        assert!(repo.get("5.1", "matrix").is_some());
        assert!(repo.get("5.1", "").is_none());
        assert!(repo.get("stereo", "5.1").is_none());
    }
}
