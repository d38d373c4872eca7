//! XML normalization: namespace prefixes are dropped in favor of local
//! names, repeated sibling elements collapse into ordered sequences, and
//! the X-Road envelope header is probed for classification metadata.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use tree::{Path, Tree};

/// Normalize decoded text that sniffed as XML.
/// Returns `(data, parse_error)`; the data tree is keyed by the root
/// element's local name.
pub fn normalize(text: &str, meta: &mut BTreeMap<String, String>) -> (Option<Tree>, Option<String>) {
    match parse_document(text) {
        Ok(Some(data)) => {
            extract_envelope_meta(&data, meta);
            (Some(data), None)
        }
        Ok(None) => (
            None,
            Some("xml_parse_error: document has no root element".to_string()),
        ),
        Err(err) => (None, Some(format!("xml_parse_error: {err}"))),
    }
}

struct Frame {
    name: String,
    children: Vec<(String, Tree)>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
            text: String::new(),
        }
    }

    // Leaf elements become scalars (or null when empty); elements with
    // children become mappings, with repeated local names collapsed into
    // a sequence in document order. Text mixed among children is dropped.
    fn into_tree(self) -> (String, Tree) {
        if self.children.is_empty() {
            let text = self.text.trim();
            if text.is_empty() {
                return (self.name, Tree::Null);
            }
            return (self.name, Tree::String(text.to_string()));
        }

        let mut grouped: BTreeMap<String, Vec<Tree>> = BTreeMap::new();
        for (name, child) in self.children {
            grouped.entry(name).or_default().push(child);
        }

        let fields = grouped
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    values.pop().unwrap_or_default()
                } else {
                    Tree::Sequence(values)
                };
                (name, value)
            })
            .collect();
        (self.name, Tree::Mapping(fields))
    }
}

fn local_name(qname: &[u8]) -> String {
    String::from_utf8_lossy(qname).into_owned()
}

fn parse_document(text: &str) -> Result<Option<Tree>, quick_xml::Error> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Tree)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(Frame::new(local_name(start.local_name().as_ref())));
            }
            Event::Empty(start) => {
                let name = local_name(start.local_name().as_ref());
                attach(&mut stack, &mut root, name, Tree::Null);
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    let (name, tree) = frame.into_tree();
                    attach(&mut stack, &mut root, name, tree);
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctypes.
            _ => {}
        }

        // Stop at the close of the root element; trailing content is noise.
        if root.is_some() && stack.is_empty() {
            break;
        }
    }

    Ok(root.map(|(name, tree)| {
        let mut fields = BTreeMap::new();
        fields.insert(name, tree);
        Tree::Mapping(fields)
    }))
}

fn attach(stack: &mut Vec<Frame>, root: &mut Option<(String, Tree)>, name: String, tree: Tree) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push((name, tree));
    } else if root.is_none() {
        *root = Some((name, tree));
    }
}

// The well-known X-Road envelope header locations. Registry codes found
// here feed document classification; the variant resolver itself stays
// predicate-driven.
const ENVELOPE_PROBES: &[(&str, &str)] = &[
    ("registry_code", "$.Envelope.Header.client.subsystemCode"),
    ("service_code", "$.Envelope.Header.service.subsystemCode"),
    ("method_code", "$.Envelope.Header.service.serviceCode"),
    ("request_id", "$.Envelope.Header.id"),
    ("user_id", "$.Envelope.Header.userId"),
];

fn extract_envelope_meta(data: &Tree, meta: &mut BTreeMap<String, String>) {
    for (key, probe) in ENVELOPE_PROBES {
        let Some(value) = probe_string(data, probe) else {
            continue;
        };
        meta.insert((*key).to_string(), value);
    }
}

fn probe_string(data: &Tree, path: &str) -> Option<String> {
    let value = Path::compile(path).ok()?.first(data)?.scalar_to_string()?;
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed)
}
