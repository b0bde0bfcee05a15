use serde::{Deserialize, Serialize};

/// Encode-time header fields and tag length
///
/// Every field has the conventional default, so a partial YAML or JSON
/// document deserializes into a usable value:
///
/// ```yaml
/// algorithm: T
/// version_id: B
/// tag_length: 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Block mode family: `'D'` = CBC, `'B'` = ECB
    pub version_id: char,

    /// Two-character key usage tag (`"D0"` data encryption, `"P0"` PIN
    /// encryption, `"K0"` key encryption). Carried, never interpreted.
    pub key_usage: String,

    /// `'A'` = AES, `'T'` = TDES
    pub algorithm: char,

    /// Informational mode of use (`'E'`, `'D'`, `'B'`, ...)
    pub mode_of_use: char,

    /// Two-character key version
    pub key_version: String,

    /// `'E'` exportable, `'N'` non-exportable
    pub exportability: char,

    /// Tag length in bytes (4, 8 or 16)
    pub tag_length: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            version_id: 'D',
            key_usage: "D0".to_string(),
            algorithm: 'A',
            mode_of_use: 'E',
            key_version: "00".to_string(),
            exportability: 'E',
            tag_length: 8,
        }
    }
}

impl EncodeOptions {
    pub fn with_version_id(mut self, version_id: char) -> Self {
        self.version_id = version_id;
        self
    }

    pub fn with_algorithm(mut self, algorithm: char) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_key_usage(mut self, key_usage: impl Into<String>) -> Self {
        self.key_usage = key_usage.into();
        self
    }

    pub fn with_mode_of_use(mut self, mode_of_use: char) -> Self {
        self.mode_of_use = mode_of_use;
        self
    }

    pub fn with_key_version(mut self, key_version: impl Into<String>) -> Self {
        self.key_version = key_version.into();
        self
    }

    pub fn with_exportability(mut self, exportability: char) -> Self {
        self.exportability = exportability;
        self
    }

    pub fn with_tag_length(mut self, tag_length: usize) -> Self {
        self.tag_length = tag_length;
        self
    }

    /// Copy with every header field upper-cased
    ///
    /// Key blocks are emitted upper-case, so cipher selection must see the
    /// same codes that end up in the header.
    pub fn to_ascii_uppercase(&self) -> Self {
        Self {
            version_id: self.version_id.to_ascii_uppercase(),
            key_usage: self.key_usage.to_ascii_uppercase(),
            algorithm: self.algorithm.to_ascii_uppercase(),
            mode_of_use: self.mode_of_use.to_ascii_uppercase(),
            key_version: self.key_version.to_ascii_uppercase(),
            exportability: self.exportability.to_ascii_uppercase(),
            tag_length: self.tag_length,
        }
    }
}

/// How `decode` finds the boundary between ciphertext and tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Accept only a split whose recomputed tag matches the stored one
    #[default]
    Authenticated,

    /// Accept the first block-aligned split that decrypts, without checking
    /// the tag. Kept for blocks produced by systems that rely on it; a wrong
    /// KEK or corrupted block yields garbage rather than an error.
    Structural,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EncodeOptions::default();
        assert_eq!(options.version_id, 'D');
        assert_eq!(options.key_usage, "D0");
        assert_eq!(options.algorithm, 'A');
        assert_eq!(options.mode_of_use, 'E');
        assert_eq!(options.key_version, "00");
        assert_eq!(options.exportability, 'E');
        assert_eq!(options.tag_length, 8);
        assert_eq!(SplitStrategy::default(), SplitStrategy::Authenticated);
    }

    #[test]
    fn test_builder_chain() {
        let options = EncodeOptions::default()
            .with_algorithm('T')
            .with_version_id('B')
            .with_key_usage("P0")
            .with_mode_of_use('B')
            .with_key_version("07")
            .with_exportability('N')
            .with_tag_length(16);

        assert_eq!(options.algorithm, 'T');
        assert_eq!(options.version_id, 'B');
        assert_eq!(options.key_usage, "P0");
        assert_eq!(options.mode_of_use, 'B');
        assert_eq!(options.key_version, "07");
        assert_eq!(options.exportability, 'N');
        assert_eq!(options.tag_length, 16);
    }

    #[test]
    fn test_to_ascii_uppercase() {
        let options = EncodeOptions::default()
            .with_algorithm('t')
            .with_version_id('d')
            .with_key_usage("k0")
            .with_exportability('n')
            .with_tag_length(4)
            .to_ascii_uppercase();

        assert_eq!(options.algorithm, 'T');
        assert_eq!(options.version_id, 'D');
        assert_eq!(options.key_usage, "K0");
        assert_eq!(options.exportability, 'N');
        assert_eq!(options.tag_length, 4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let options: EncodeOptions =
            serde_json::from_str(r#"{"algorithm":"T","tag_length":4}"#).unwrap();

        assert_eq!(options.algorithm, 'T');
        assert_eq!(options.tag_length, 4);
        assert_eq!(options.version_id, 'D');
        assert_eq!(options.key_usage, "D0");
    }

    #[test]
    fn test_split_strategy_serde() {
        let strategy: SplitStrategy = serde_json::from_str(r#""structural""#).unwrap();
        assert_eq!(strategy, SplitStrategy::Structural);
    }
}
