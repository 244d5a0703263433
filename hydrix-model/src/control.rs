use serde::{Deserialize, Serialize};

use crate::plugin::{PluginDescriptor, PluginKind};

/// Raw target input: literal text and/or file references, plus an optional
/// raw-request template used to expand bare hostnames.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub input: String,
    pub input_files: Vec<String>,
    pub request_template: Option<String>,
    pub https_default: bool,
}

/// Catalog filter applied when no explicit plugin names are given (or in
/// addition to them).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginFilter {
    pub kinds: Vec<PluginKind>,
    pub keyword: Option<String>,
}

impl PluginFilter {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty() && self.keyword.is_none()
    }

    /// An empty kind list matches every kind; the keyword is a
    /// case-insensitive substring match on the plugin name.
    pub fn matches(&self, plugin: &PluginDescriptor) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&plugin.kind) {
            return false;
        }
        match &self.keyword {
            Some(keyword) => plugin
                .name
                .to_lowercase()
                .contains(&keyword.to_lowercase()),
            None => true,
        }
    }
}

/// Plugin selection: explicit names and/or a filter query.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub names: Vec<String>,
    pub filter: Option<PluginFilter>,
}

/// Inbound control-channel messages. The client sends `targets` and
/// `plugins` (any order) to start a run, or `resume` with a task id to
/// continue a stored one; `pause`/`resume`/`stop` are accepted at any time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Targets(TargetConfig),
    Plugins(PluginConfig),
    Pause,
    Resume {
        #[serde(default)]
        task_id: Option<String>,
    },
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_are_tag_discriminated() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"targets","input":"example.com"}"#).unwrap();
        match msg {
            ControlMessage::Targets(config) => {
                assert_eq!(config.input, "example.com");
                assert!(config.input_files.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ControlMessage = serde_json::from_str(r#"{"type":"pause"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Pause));

        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"resume","task_id":"t-9"}"#).unwrap();
        match msg {
            ControlMessage::Resume { task_id } => {
                assert_eq!(task_id.as_deref(), Some("t-9"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
