// Configuration setting model and paginated batches of settings.
use time::OffsetDateTime;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigurationSetting {
    pub key: String,
    pub label: Option<String>,
    pub value: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub locked: bool,
    pub last_modified: Option<OffsetDateTime>,
}

impl ConfigurationSetting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One page of settings. `continuation` is the cursor for the next page, if any.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SettingBatch {
    settings: Vec<ConfigurationSetting>,
    continuation: Option<u64>,
}

impl SettingBatch {
    pub fn new(settings: Vec<ConfigurationSetting>, continuation: Option<u64>) -> Self {
        Self {
            settings,
            continuation,
        }
    }

    pub fn settings(&self) -> &[ConfigurationSetting] {
        &self.settings
    }

    pub fn continuation(&self) -> Option<u64> {
        self.continuation
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn into_settings(self) -> Vec<ConfigurationSetting> {
        self.settings
    }
}
