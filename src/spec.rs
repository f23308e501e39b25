use crate::config::{config_key, Config, ConfigValue};
use crate::error::{Error, Result};
use crate::registry::{ModifierKind, SinkKind, SourceKind};

use std::fmt;
use std::fs;
use std::path::Path;

/// What a node payload is made of
#[derive(Debug, Clone)]
pub enum Payload {
    None,
    /// A chain link
    Single(Box<SpecNode>),
    /// A group of alternatives
    Group(Vec<SpecNode>),
}

/// The classification of a node, decided from its name and whether it has a payload
#[derive(Debug, Clone)]
pub enum NodeKind {
    Source(SourceKind),
    Modifier(ModifierKind),
    Sink(SinkKind),
    /// Config attached to a nested payload, such as the tree root or a group member
    Opaque,
}

/// A validated node of the spec tree. It is immutable once built.
#[derive(Debug, Clone)]
pub struct SpecNode {
    name: Option<String>,
    config: Config,
    payload: Payload,
    kind: NodeKind,
}

impl SpecNode {
    /// Parse and validate a whole spec document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(s)?;
        SpecNode::from_table(None, table)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        log::debug!("Loading spec {}", path.display());
        SpecNode::from_toml_str(&content)
    }

    /// Build a node from a tree value: a table is split into config and payload,
    /// an array becomes a group
    pub fn from_value(name: Option<String>, value: toml::Value) -> Result<Self> {
        match value {
            toml::Value::Table(table) => SpecNode::from_table(name, table),
            toml::Value::Array(items) => {
                let children = items
                    .into_iter()
                    .map(|item| SpecNode::from_value(None, item))
                    .collect::<Result<Vec<_>>>()?;
                SpecNode::new(name, Config::new(), Payload::Group(children))
            }
            other => Err(Error::structural(
                label(name.as_deref()),
                format!("payload must be a table or an array, not a {}", other.type_str()),
            )),
        }
    }

    pub fn from_table(name: Option<String>, table: toml::Table) -> Result<Self> {
        let mut config = Config::new();
        let mut payload: Option<(String, toml::Value)> = None;
        for (key, value) in table {
            if let Some(attr) = config_key(&key) {
                let value = ConfigValue::from_toml(value).ok_or_else(|| {
                    Error::structural(
                        label(name.as_deref()),
                        format!("attribute {attr:?} is neither a scalar nor a list"),
                    )
                })?;
                config.insert(attr.to_string(), value);
            } else if let Some((first, _)) = &payload {
                return Err(Error::structural(
                    label(name.as_deref()),
                    format!("more than one payload source ({first:?} and {key:?})"),
                ));
            } else {
                payload = Some((key, value));
            }
        }
        let payload = match payload {
            Some((key, value)) => {
                Payload::Single(Box::new(SpecNode::from_value(Some(key), value)?))
            }
            None => Payload::None,
        };
        SpecNode::new(name, config, payload)
    }

    /// Classify and validate a node whose children are already validated
    fn new(name: Option<String>, config: Config, payload: Payload) -> Result<Self> {
        let kind = classify(name.as_deref(), &config, &payload)
            .map_err(|reason| Error::structural(label(name.as_deref()), reason))?;
        let node = SpecNode {
            name,
            config,
            payload,
            kind,
        };
        if !node.has_source() {
            return Err(Error::structural(&node, "no packet sources"));
        }
        if let NodeKind::Modifier(m) = &node.kind {
            node.check_payload_shape(m)?;
        }
        Ok(node)
    }

    fn check_payload_shape(&self, modifier: &ModifierKind) -> Result<()> {
        match (&self.payload, modifier.takes_group()) {
            (Payload::Single(_), false) => Ok(()),
            (Payload::Group(members), true) => {
                let mut total = 0.;
                for member in members {
                    if !matches!(member.payload, Payload::Single(_)) {
                        return Err(Error::structural(
                            self,
                            "each choice must carry exactly one payload",
                        ));
                    }
                    let weight = member.probability().ok_or_else(|| {
                        Error::structural(self, "each choice needs a non-negative probability")
                    })?;
                    total += weight;
                }
                if !total.is_finite() {
                    Err(Error::structural(self, "probabilities sum to infinity"))
                } else if total > 0. {
                    Ok(())
                } else {
                    Err(Error::structural(self, "probabilities sum to zero"))
                }
            }
            (_, false) => Err(Error::structural(self, "expects a single payload")),
            (_, true) => Err(Error::structural(self, "expects a group of choices")),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, NodeKind::Source(_))
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.kind, NodeKind::Sink(_))
    }

    pub fn is_modifier(&self) -> bool {
        matches!(self.kind, NodeKind::Modifier(_))
    }

    /// The relative weight of a weighted-selection choice
    pub fn probability(&self) -> Option<f64> {
        self.config
            .get("probability")
            .and_then(ConfigValue::as_f64)
            .filter(|p| *p >= 0. && p.is_finite())
    }

    /// Whether a source can be reached by following payloads
    pub fn has_source(&self) -> bool {
        match &self.payload {
            Payload::None => self.is_source(),
            Payload::Single(child) => child.has_source(),
            Payload::Group(children) => children.iter().any(SpecNode::has_source),
        }
    }
}

fn label(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("node \"{name}\""),
        None => "the root node".to_string(),
    }
}

/// A node with a payload is a sink or a modifier, in that order. Without payload, it may
/// be a source. Anything else is opaque.
fn classify(
    name: Option<&str>,
    config: &Config,
    payload: &Payload,
) -> std::result::Result<NodeKind, String> {
    let Some(name) = name else {
        return Ok(NodeKind::Opaque);
    };
    let has_payload = !matches!(payload, Payload::None);
    if has_payload {
        if let Some(sink) = SinkKind::from_config(name, config) {
            return sink.map(NodeKind::Sink);
        }
        if let Some(modifier) = ModifierKind::from_config(name, config) {
            return modifier.map(NodeKind::Modifier);
        }
    } else if let Some(source) = SourceKind::from_config(name, config) {
        return source.map(NodeKind::Source);
    }
    Ok(NodeKind::Opaque)
}

impl fmt::Display for SpecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", label(self.name.as_deref()))?;
        if !self.config.is_empty() {
            let attrs: Vec<String> = self.config.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, " ({})", attrs.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structural_reason(res: Result<SpecNode>) -> String {
        match res {
            Err(Error::Structural { reason, .. }) => reason,
            other => panic!("expected a structural error, got {other:?}"),
        }
    }

    #[test]
    fn test_chain() {
        let node = SpecNode::from_toml_str(
            r#"
_count = 3
[ip]
_dst = "10.0.0.2"
[ip.tcp]
_seq = "increasing"
[ip.tcp.raw]
_data = "hello"
"#,
        )
        .unwrap();
        assert_eq!(node.name(), None);
        assert!(matches!(node.kind(), NodeKind::Opaque));
        assert_eq!(node.config().get("count"), Some(&ConfigValue::Int(3)));
        let Payload::Single(ip) = node.payload() else {
            panic!("root should have a single payload")
        };
        assert!(ip.is_modifier());
        let Payload::Single(tcp) = ip.payload() else {
            panic!("ip should have a single payload")
        };
        assert!(tcp.is_modifier());
        let Payload::Single(raw) = tcp.payload() else {
            panic!("tcp should have a single payload")
        };
        assert!(raw.is_source());
        assert!(matches!(raw.payload(), Payload::None));
    }

    #[test]
    fn test_two_payloads() {
        let reason = structural_reason(SpecNode::from_toml_str(
            r#"
[raw]
_data = "a"
[randbytes]
_size = 4
"#,
        ));
        assert!(reason.contains("more than one payload source"));
    }

    #[test]
    fn test_no_source() {
        let reason = structural_reason(SpecNode::from_toml_str(
            r#"
[ip.tcp.unknown]
_data = "a"
"#,
        ));
        assert_eq!(reason, "no packet sources");
        // a modifier without payload is not a source either
        let reason = structural_reason(SpecNode::from_toml_str("[ip.tcp]\n_sport = 4"));
        assert_eq!(reason, "no packet sources");
        let reason = structural_reason(SpecNode::from_toml_str("pdist = []"));
        assert_eq!(reason, "no packet sources");
    }

    #[test]
    fn test_no_source_deep() {
        let mut doc = String::new();
        for depth in 1..8 {
            let path = vec!["a"; depth].join(".");
            doc.push_str(&format!("[{path}]\n_x = {depth}\n"));
        }
        assert_eq!(
            structural_reason(SpecNode::from_toml_str(&doc)),
            "no packet sources"
        );
    }

    #[test]
    fn test_group() {
        let node = SpecNode::from_toml_str(
            r#"
[[pdist]]
_probability = 1
[pdist.raw]
_data = "a"

[[pdist]]
_probability = 2.5
[pdist.randbytes]
_size = 10
"#,
        )
        .unwrap();
        let Payload::Single(pdist) = node.payload() else {
            panic!("root should have a single payload")
        };
        assert!(pdist.is_modifier());
        let Payload::Group(choices) = pdist.payload() else {
            panic!("pdist should hold a group")
        };
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].probability(), Some(1.));
        assert_eq!(choices[1].probability(), Some(2.5));
        assert!(matches!(choices[1].kind(), NodeKind::Opaque));
    }

    #[test]
    fn test_group_validation() {
        let missing = r#"
[[pdist]]
[pdist.raw]
_data = "a"
"#;
        assert!(structural_reason(SpecNode::from_toml_str(missing)).contains("probability"));
        let negative = r#"
[[pdist]]
_probability = -1
[pdist.raw]
_data = "a"
"#;
        assert!(structural_reason(SpecNode::from_toml_str(negative)).contains("probability"));
        let single = "[pdist.raw]\n_data = \"a\"";
        assert!(structural_reason(SpecNode::from_toml_str(single)).contains("group"));
        let zero = r#"
[[pdist]]
_probability = 0
[pdist.raw]
_data = "a"
"#;
        assert!(structural_reason(SpecNode::from_toml_str(zero)).contains("zero"));
        let overflow = r#"
[[pdist]]
_probability = 1e308
[pdist.raw]
_data = "a"

[[pdist]]
_probability = 1e308
[pdist.raw]
_data = "b"
"#;
        assert!(structural_reason(SpecNode::from_toml_str(overflow)).contains("infinity"));
    }

    #[test]
    fn test_bad_attributes() {
        let reason = structural_reason(SpecNode::from_toml_str("[randbytes]\n_mean = 3"));
        assert!(reason.starts_with("invalid configuration"));
        let reason = structural_reason(SpecNode::from_toml_str("[ip.raw]\n_data = { a = 1 }"));
        assert!(reason.contains("neither a scalar nor a list"));
        let reason = structural_reason(SpecNode::from_toml_str("raw = 3"));
        assert!(reason.contains("payload must be a table"));
    }

    #[test]
    fn test_format_error() {
        assert!(matches!(
            SpecNode::from_toml_str("[ip\n_x = "),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_classification_exclusive() {
        let node = SpecNode::from_toml_str(
            r#"
[pcap]
_path = "x.pcap"
[pcap.raw]
_data = "a"
"#,
        )
        .unwrap();
        let Payload::Single(pcap) = node.payload() else {
            panic!("root should have a single payload")
        };
        assert!(pcap.is_sink());
        for n in [&node, &**pcap] {
            let flags = [n.is_source(), n.is_sink(), n.is_modifier()];
            assert!(flags.iter().filter(|f| **f).count() <= 1);
        }
        // a source name with a payload is an opaque chain link
        let node = SpecNode::from_toml_str("[raw.raw]\n_data = \"a\"").unwrap();
        let Payload::Single(outer) = node.payload() else {
            panic!("root should have a single payload")
        };
        assert!(matches!(outer.kind(), NodeKind::Opaque));
    }

    #[test]
    fn test_idempotent() {
        let doc = r#"
_count = 2
[ip6.tcp]
_flags = "SA"
[ip6.tcp.randbytes]
_size = 5
_deviation = 1.5
"#;
        let a = SpecNode::from_toml_str(doc).unwrap();
        let b = SpecNode::from_toml_str(doc).unwrap();
        assert_eq!(a.config(), b.config());
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }
}
