use std::path::{Path, PathBuf};

/// Every well-known protocol file, rooted at one shared directory.
///
/// All windows and the requester agree on these names; nothing else is
/// exchanged between processes.
#[derive(Debug, Clone)]
pub struct ProtocolPaths {
    base: PathBuf,
}

impl ProtocolPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn file(&self, name: String) -> PathBuf {
        self.base.join(name)
    }

    pub fn registration(&self, hash: &str) -> PathBuf {
        self.file(format!("review_gate_ws_{hash}.json"))
    }

    pub fn scoped_trigger(&self, hash: &str) -> PathBuf {
        self.file(format!("review_gate_trigger_{hash}.json"))
    }

    pub fn generic_trigger(&self) -> PathBuf {
        self.file("review_gate_trigger.json".to_string())
    }

    pub fn lock(&self, trigger_id: &str) -> PathBuf {
        self.file(format!("review_gate_lock_{trigger_id}.json"))
    }

    pub fn ack(&self, trigger_id: &str) -> PathBuf {
        self.file(format!("review_gate_ack_{trigger_id}.json"))
    }

    /// Response locations in write order, most specific first.
    ///
    /// The hash-scoped name is skipped when no hash is known.
    pub fn responses(&self, hash: Option<&str>, trigger_id: &str) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(5);
        if let Some(hash) = hash {
            out.push(self.file(format!("review_gate_response_{hash}_{trigger_id}.json")));
        }
        out.push(self.file(format!("review_gate_response_{trigger_id}.json")));
        out.push(self.file("review_gate_response.json".to_string()));
        out.push(self.file(format!("mcp_response_{trigger_id}.json")));
        out.push(self.file("mcp_response.json".to_string()));
        out
    }

    pub fn speech_trigger(&self, trigger_id: &str) -> PathBuf {
        self.file(format!("review_gate_speech_trigger_{trigger_id}.json"))
    }

    pub fn speech_response(&self, trigger_id: &str) -> PathBuf {
        self.file(format!("review_gate_speech_response_{trigger_id}.json"))
    }

    /// Written by the agent process; only its mtime matters.
    pub fn heartbeat(&self) -> PathBuf {
        self.file("review_gate_v2.log".to_string())
    }

    pub fn input_log(&self) -> PathBuf {
        self.file("review_gate_user_inputs.log".to_string())
    }

    pub fn recording(&self, trigger_id: &str, stamp_millis: i64) -> PathBuf {
        self.file(format!("review_gate_audio_{trigger_id}_{stamp_millis}.wav"))
    }

    pub fn encoded_audio(&self, trigger_id: &str, stamp_millis: i64) -> PathBuf {
        self.file(format!("review_gate_webaudio_{trigger_id}_{stamp_millis}.webm"))
    }

    pub fn device_probe(&self, stamp_millis: i64) -> PathBuf {
        self.file(format!("review_gate_test_{stamp_millis}.wav"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_include_hash_scoped_name_first() {
        let paths = ProtocolPaths::new("/tmp");
        let names: Vec<String> = paths
            .responses(Some("abcd1234"), "t1")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "review_gate_response_abcd1234_t1.json",
                "review_gate_response_t1.json",
                "review_gate_response.json",
                "mcp_response_t1.json",
                "mcp_response.json",
            ]
        );
    }

    #[test]
    fn responses_without_hash_keep_fallbacks() {
        let paths = ProtocolPaths::new("/tmp");
        let responses = paths.responses(None, "t1");
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0], PathBuf::from("/tmp/review_gate_response_t1.json"));
    }

    #[test]
    fn trigger_names_follow_scope() {
        let paths = ProtocolPaths::new("/x");
        assert_eq!(
            paths.scoped_trigger("deadbeef"),
            PathBuf::from("/x/review_gate_trigger_deadbeef.json")
        );
        assert_eq!(paths.generic_trigger(), PathBuf::from("/x/review_gate_trigger.json"));
        assert_eq!(paths.lock("9"), PathBuf::from("/x/review_gate_lock_9.json"));
        assert_eq!(
            paths.speech_response("9"),
            PathBuf::from("/x/review_gate_speech_response_9.json")
        );
    }
}
