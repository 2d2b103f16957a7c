use crate::import::text::TextAccumulator;

/// Tags the import grammar recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Root,
    DatabaseList,
    Database,
    VersionMajor,
    VersionMinor,
    VersionRevision,
    EntityList,
    Entity,
    Column,
    Unknown,
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Root" => ElementKind::Root,
            "DatabaseList" => ElementKind::DatabaseList,
            "Database" => ElementKind::Database,
            "VersionMajor" => ElementKind::VersionMajor,
            "VersionMinor" => ElementKind::VersionMinor,
            "VersionRevision" => ElementKind::VersionRevision,
            "EntityList" => ElementKind::EntityList,
            "Entity" => ElementKind::Entity,
            "Column" => ElementKind::Column,
            _ => ElementKind::Unknown,
        }
    }

    /// Elements whose text content carries a value.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            ElementKind::VersionMajor
                | ElementKind::VersionMinor
                | ElementKind::VersionRevision
                | ElementKind::Column
        )
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: TextAccumulator,
    pub kind: ElementKind,
}

impl Element {
    pub fn new(tag: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        let tag = tag.into();
        let kind = ElementKind::from_tag(&tag);
        Self {
            tag,
            attributes,
            text: TextAccumulator::new(),
            kind,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Open elements from the document root down to the current one.
#[derive(Debug, Default)]
pub struct ElementStack {
    elements: Vec<Element>,
}

impl ElementStack {
    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    pub fn pop(&mut self) -> Option<Element> {
        self.elements.pop()
    }

    pub fn top(&self) -> Option<&Element> {
        self.elements.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Element> {
        self.elements.last_mut()
    }

    pub fn top_kind(&self) -> Option<ElementKind> {
        self.top().map(|e| e.kind)
    }

    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    /// `/Root/DatabaseList/Database[main]/...`, with the `alias` or `name`
    /// attribute shown where present.
    pub fn path(&self) -> String {
        if self.elements.is_empty() {
            return "/".to_string();
        }
        let mut path = String::new();
        for element in &self.elements {
            path.push('/');
            path.push_str(&element.tag);
            if let Some(label) = element
                .attribute("alias")
                .or_else(|| element.attribute("name"))
            {
                path.push('[');
                path.push_str(label);
                path.push(']');
            }
        }
        path
    }

    /// Path of the current position extended by a tag that was not accepted.
    pub fn path_with(&self, tag: &str) -> String {
        let base = self.path();
        if base == "/" {
            format!("/{tag}")
        } else {
            format!("{base}/{tag}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Element, ElementKind, ElementStack};

    #[test]
    fn path_shows_labels() {
        let mut stack = ElementStack::default();
        assert_eq!(stack.path(), "/");
        stack.push(Element::new("Root", Vec::new()));
        stack.push(Element::new("DatabaseList", Vec::new()));
        stack.push(Element::new(
            "Database",
            vec![("alias".into(), "main".into())],
        ));
        assert_eq!(stack.path(), "/Root/DatabaseList/Database[main]");
        assert_eq!(
            stack.path_with("Bogus"),
            "/Root/DatabaseList/Database[main]/Bogus"
        );
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.top_kind(), Some(ElementKind::Database));
    }

    #[test]
    fn unknown_tags_map_to_unknown_kind() {
        assert_eq!(ElementKind::from_tag("Table"), ElementKind::Unknown);
        assert!(ElementKind::Column.is_leaf());
        assert!(!ElementKind::Entity.is_leaf());
    }
}
