//! The document the engine filters.
//!
//! [`Page`] is the tree-query capability the engine is written against: a
//! handful of read primitives, a handful of writes, and a mutation
//! subscription. [`Dom`] is an in-memory implementation backed by the
//! `scraper` HTML parser, used by the binary and the tests.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use scraper::{ElementRef, Html};
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::environment::Signals;
use crate::error::DomError;

pub type NodeId = usize;

/// A child-list change somewhere under the observed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: usize,
    pub removed: usize,
}

/// Live subscription to structural changes. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<MutationRecord>,
}

impl Subscription {
    pub fn channel() -> (mpsc::UnboundedSender<MutationRecord>, Subscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Subscription { receiver })
    }

    /// Wait for the next structural change
    pub async fn changed(&mut self) -> Option<MutationRecord> {
        self.receiver.recv().await
    }

    /// Drain one pending change without waiting
    pub fn try_next(&mut self) -> Option<MutationRecord> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        trace!("mutation subscription released");
    }
}

pub trait Page {
    fn body(&self) -> Option<NodeId>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    /// Element children only, in document order
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Lowercase tag name, `None` for anything that is not an element
    fn tag_name(&self, node: NodeId) -> Option<String>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn text_content(&self, node: NodeId) -> String;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;
    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError>;
    /// Replace every child of `node` with a single text node
    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<(), DomError>;
    fn create_element(&mut self, tag: &str) -> NodeId;
    fn insert_child(&mut self, parent: NodeId, child: NodeId, index: usize)
    -> Result<(), DomError>;
    fn detach(&mut self, node: NodeId) -> Result<(), DomError>;

    fn location(&self) -> Url;
    fn navigate(&mut self, url: Url);
    fn signals(&self) -> Signals;

    fn observe(&mut self) -> Subscription;

    /// Every element below `root` in document order, excluding `root`
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        out
    }

    /// Strict ancestors, nearest first
    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    /// The `display` value declared in the inline style, if any
    fn inline_display(&self, node: NodeId) -> Option<String> {
        let style = self.attribute(node, "style")?;
        let range = display_declaration(&style)?;
        let (_, value) = style[range].split_once(':')?;
        Some(value.trim().to_string())
    }

    /// Replace (or with `None`, drop) the inline `display` declaration.
    /// Only that declaration's text changes; the rest of the attribute is
    /// kept byte for byte.
    fn set_inline_display(&mut self, node: NodeId, value: Option<&str>) -> Result<(), DomError> {
        let style = self.attribute(node, "style").unwrap_or_default();
        let replacement = value
            .filter(|v| !v.is_empty())
            .map(|v| format!("display: {v}"));

        let updated = match (display_declaration(&style), replacement) {
            (Some(range), Some(replacement)) => {
                let decl = &style[range.clone()];
                let lead = decl.len() - decl.trim_start().len();
                let trail = decl.len() - decl.trim_end().len();
                let mut out = style.clone();
                out.replace_range(range.start + lead..range.end - trail, &replacement);
                out
            }
            (Some(range), None) => {
                let mut out = style.clone();
                if style[range.end..].starts_with(';') {
                    out.replace_range(range.start..range.end + 1, "");
                } else {
                    let start = style[..range.start].rfind(';').unwrap_or(range.start);
                    out.replace_range(start..range.end, "");
                }
                out.trim().to_string()
            }
            (None, Some(replacement)) => {
                let base = style.trim_end();
                if base.is_empty() {
                    replacement
                } else if base.ends_with(';') {
                    format!("{base} {replacement};")
                } else {
                    format!("{base}; {replacement}")
                }
            }
            (None, None) => return Ok(()),
        };

        if updated.trim().is_empty() {
            self.remove_attribute(node, "style")
        } else {
            self.set_attribute(node, "style", &updated)
        }
    }

    fn is_display_suppressed(&self, node: NodeId) -> bool {
        self.inline_display(node)
            .is_some_and(|display| display.eq_ignore_ascii_case("none"))
    }
}

/// Byte ranges of the declarations in an inline style. Semicolons inside
/// quotes or parentheses (`url("data:...;base64,...")`) do not split.
fn declarations(style: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in style.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                out.push(start..i);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(start..style.len());
    out
}

/// The first `display` declaration, if any
fn display_declaration(style: &str) -> Option<Range<usize>> {
    declarations(style).into_iter().find(|range| {
        style[range.clone()]
            .split_once(':')
            .is_some_and(|(prop, _)| prop.trim().eq_ignore_ascii_case("display"))
    })
}

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    removed: bool,
}

const ROOT: NodeId = 0;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Arena-backed mutable document
#[derive(Debug)]
pub struct Dom {
    nodes: Vec<Node>,
    location: Url,
    user_agent: String,
    viewport_width: Option<u32>,
    observers: Vec<mpsc::UnboundedSender<MutationRecord>>,
}

pub type SharedDom = Rc<RefCell<Dom>>;

impl Dom {
    pub fn empty(location: Url) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                removed: false,
            }],
            location,
            user_agent: String::new(),
            viewport_width: None,
            observers: Vec::new(),
        }
    }

    /// Parse a whole HTML document
    pub fn parse(html: &str, location: Url) -> Self {
        let parsed = Html::parse_document(html);
        let mut dom = Self::empty(location);
        let root = parsed.root_element();
        let html_id = dom.alloc(element_kind(root));
        dom.link(ROOT, html_id, usize::MAX);
        dom.import_children(root, html_id);
        dom
    }

    pub fn parse_str(html: &str, location: &str) -> anyhow::Result<Self> {
        Ok(Self::parse(html, Url::parse(location)?))
    }

    /// Parse an HTML fragment and append it to `parent`, the way a host page
    /// inserts new content. Returns the top-level elements inserted.
    pub fn append_html(&mut self, parent: NodeId, html: &str) -> Result<Vec<NodeId>, DomError> {
        self.ensure_writable(parent)?;
        let fragment = Html::parse_fragment(html);
        let before = self.nodes[parent].children.len();
        self.import_children(fragment.root_element(), parent);
        let added: Vec<NodeId> = self.nodes[parent].children[before..].to_vec();
        if !added.is_empty() {
            self.notify(MutationRecord {
                target: parent,
                added: added.len(),
                removed: 0,
            });
        }
        Ok(added
            .into_iter()
            .filter(|id| matches!(self.nodes[*id].kind, NodeKind::Element { .. }))
            .collect())
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = Some(width);
        self
    }

    pub fn set_viewport_width(&mut self, width: u32) {
        self.viewport_width = Some(width);
    }

    /// Number of subscriptions still listening
    pub fn observer_count(&self) -> usize {
        self.observers.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// First element carrying the given `id` attribute
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .find(|node| self.attribute(*node, "id").as_deref() == Some(id))
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in &self.nodes[ROOT].children {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Document => {}
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in &self.nodes[id].children {
                    self.write_node(*child, out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }

    fn import_children(&mut self, source: ElementRef<'_>, parent: NodeId) {
        let mut stack: Vec<_> = source.children().map(|child| (child, parent)).collect();
        stack.reverse();
        while let Some((node, parent)) = stack.pop() {
            let id = match node.value() {
                scraper::Node::Element(_) => match ElementRef::wrap(node) {
                    Some(element) => self.alloc(element_kind(element)),
                    None => continue,
                },
                scraper::Node::Text(text) => self.alloc(NodeKind::Text((**text).to_string())),
                _ => continue,
            };
            self.link(parent, id, usize::MAX);
            let children: Vec<_> = node.children().collect();
            for child in children.into_iter().rev() {
                stack.push((child, id));
            }
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            removed: false,
        });
        self.nodes.len() - 1
    }

    fn link(&mut self, parent: NodeId, child: NodeId, index: usize) {
        let siblings = &mut self.nodes[parent].children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.nodes[child].parent = Some(parent);
        self.nodes[child].removed = false;
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn is_removed(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get(id)) {
            if node.removed {
                return true;
            }
            current = node.parent;
        }
        false
    }

    fn ensure_writable(&self, id: NodeId) -> Result<(), DomError> {
        if self.node(id).is_none() {
            return Err(DomError::Missing(id));
        }
        if self.is_removed(id) {
            return Err(DomError::Detached(id));
        }
        Ok(())
    }

    fn attrs_mut(&mut self, id: NodeId) -> Result<&mut Vec<(String, String)>, DomError> {
        self.ensure_writable(id)?;
        match &mut self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => Ok(attrs),
            _ => Err(DomError::NotElement(id)),
        }
    }

    fn notify(&mut self, record: MutationRecord) {
        self.observers
            .retain(|observer| observer.send(record.clone()).is_ok());
    }
}

impl Page for Dom {
    fn body(&self) -> Option<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .find(|node| self.tag_name(*node).as_deref() == Some("body"))
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node)
            .map(|n| {
                n.children
                    .iter()
                    .copied()
                    .filter(|child| matches!(self.nodes[*child].kind, NodeKind::Element { .. }))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        match &self.node(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.node(node)?.kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone()),
            _ => None,
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(current) = self.node(id) else {
                continue;
            };
            if let NodeKind::Text(text) = &current.kind {
                out.push_str(text);
            }
            stack.extend(current.children.iter().rev().copied());
        }
        out
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let attrs = self.attrs_mut(node)?;
        match attrs.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some(slot) => slot.1 = value.to_string(),
            None => attrs.push((name.to_ascii_lowercase(), value.to_string())),
        }
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError> {
        self.attrs_mut(node)?
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        Ok(())
    }

    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.ensure_writable(node)?;
        let text_id = self.alloc(NodeKind::Text(text.to_string()));
        for child in std::mem::take(&mut self.nodes[node].children) {
            self.nodes[child].parent = None;
            self.nodes[child].removed = true;
        }
        self.link(node, text_id, 0);
        Ok(())
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: usize,
    ) -> Result<(), DomError> {
        self.ensure_writable(parent)?;
        if self.node(child).is_none() {
            return Err(DomError::Missing(child));
        }
        if let Some(old_parent) = self.nodes[child].parent {
            self.nodes[old_parent].children.retain(|id| *id != child);
        }
        self.link(parent, child, index);
        self.notify(MutationRecord {
            target: parent,
            added: 1,
            removed: 0,
        });
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> Result<(), DomError> {
        self.ensure_writable(node)?;
        let Some(parent) = self.nodes[node].parent.take() else {
            return Err(DomError::Detached(node));
        };
        self.nodes[parent].children.retain(|id| *id != node);
        self.nodes[node].removed = true;
        self.notify(MutationRecord {
            target: parent,
            added: 0,
            removed: 1,
        });
        Ok(())
    }

    fn location(&self) -> Url {
        self.location.clone()
    }

    fn navigate(&mut self, url: Url) {
        self.location = url;
    }

    fn signals(&self) -> Signals {
        Signals {
            user_agent: self.user_agent.clone(),
            viewport_width: self.viewport_width,
            host: self.location.host_str().unwrap_or_default().to_string(),
        }
    }

    fn observe(&mut self) -> Subscription {
        self.observers.retain(|observer| !observer.is_closed());
        let (sender, subscription) = Subscription::channel();
        self.observers.push(sender);
        subscription
    }
}

/// A shared handle lets the host page keep mutating the document while a
/// session drives the engine over it.
impl<P: Page> Page for Rc<RefCell<P>> {
    fn body(&self) -> Option<NodeId> {
        self.borrow().body()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.borrow().parent(node)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.borrow().children(node)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.borrow().tag_name(node)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.borrow().attribute(node, name)
    }

    fn text_content(&self, node: NodeId) -> String {
        self.borrow().text_content(node)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.borrow_mut().set_attribute(node, name, value)
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError> {
        self.borrow_mut().remove_attribute(node, name)
    }

    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.borrow_mut().set_text_content(node, text)
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.borrow_mut().create_element(tag)
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: usize,
    ) -> Result<(), DomError> {
        self.borrow_mut().insert_child(parent, child, index)
    }

    fn detach(&mut self, node: NodeId) -> Result<(), DomError> {
        self.borrow_mut().detach(node)
    }

    fn location(&self) -> Url {
        self.borrow().location()
    }

    fn navigate(&mut self, url: Url) {
        self.borrow_mut().navigate(url)
    }

    fn signals(&self) -> Signals {
        self.borrow().signals()
    }

    fn observe(&mut self) -> Subscription {
        self.borrow_mut().observe()
    }
}

fn element_kind(element: ElementRef<'_>) -> NodeKind {
    let value = element.value();
    NodeKind::Element {
        tag: value.name().to_ascii_lowercase(),
        attrs: value
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
