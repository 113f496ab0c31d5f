//! Course metadata returned by the directory API.
//!
//! All assumptions about the upstream XML layout live here. Roughly:
//!
//! ```xml
//! <course id="140135">
//!   <longname xml:lang="de">Analysis</longname>
//!   <longname xml:lang="en">Calculus</longname>
//!   <type>VO</type>
//!   <groups>
//!     <group id="140135-1">...</group>
//!   </groups>
//! </course>
//! ```

use roxmltree::{Document, Node};

use crate::UpstreamError;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const PREFERRED_LANG: &str = "de";
const FALLBACK_LANG: &str = "en";

/// Validated subset of a directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseMetadata {
    /// German long name, or the English one when there is none.
    pub name: String,
    /// Type code such as VO or UE.
    pub course_type: String,
    /// Group ids exactly as listed upstream, e.g. `140135-1`
    pub groups: Vec<String>,
}

impl CourseMetadata {
    /// Reads a course record; each missing field has its own error.
    pub fn parse(body: &[u8]) -> Result<Self, UpstreamError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| UpstreamError::Malformed(format!("body is not UTF-8: {e}")))?;
        let doc = Document::parse(text).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        let root = doc.root_element();

        let name = longname(root, PREFERRED_LANG)
            .or_else(|| longname(root, FALLBACK_LANG))
            .ok_or(UpstreamError::MissingName)?;

        let course_type = root
            .descendants()
            .find(|n| n.has_tag_name("type"))
            .and_then(non_empty_text)
            .ok_or(UpstreamError::MissingType)?;

        let groups = root
            .descendants()
            .filter(|n| n.has_tag_name("group"))
            .filter_map(|n| n.attribute("id"))
            .map(str::to_string)
            .collect();

        Ok(Self {
            name,
            course_type,
            groups,
        })
    }

    /// Whether the record lists `<path>-<group>`.
    pub fn has_group(&self, path: &str, group: u32) -> bool {
        let wanted = format!("{path}-{group}");
        self.groups.iter().any(|id| *id == wanted)
    }
}

fn longname(root: Node<'_, '_>, lang: &str) -> Option<String> {
    root.descendants()
        .filter(|n| n.has_tag_name("longname"))
        .find(|n| n.attribute((XML_NS, "lang")) == Some(lang))
        .and_then(non_empty_text)
}

fn non_empty_text(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
