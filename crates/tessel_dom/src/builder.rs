//! Declarative element construction
//!
//! ```rust
//! use tessel_dom::{el, Document};
//!
//! let mut doc = Document::new();
//! let list = doc.build(
//!     el("ul")
//!         .attr("id", "colors")
//!         .child(el("li").class("swatch").text("red")),
//! );
//! assert_eq!(doc.to_markup(list), r#"<ul id="colors"><li class="swatch">red</li></ul>"#);
//! ```

use crate::{Document, NodeId};

enum Child {
    Element(ElementBuilder),
    Text(String),
}

/// Builder for an element subtree, consumed by [`Document::build`]
pub struct ElementBuilder {
    tag: String,
    attrs: Vec<(String, String)>,
    classes: Vec<String>,
    hidden: bool,
    children: Vec<Child>,
}

/// Start building an element with the given tag
pub fn el(tag: impl Into<String>) -> ElementBuilder {
    ElementBuilder {
        tag: tag.into(),
        attrs: Vec::new(),
        classes: Vec::new(),
        hidden: false,
        children: Vec::new(),
    }
}

impl ElementBuilder {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn class(mut self, name: impl Into<String>) -> Self {
        self.classes.push(name.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Append a text node
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Child::Text(text.into()));
        self
    }

    pub fn child(mut self, child: ElementBuilder) -> Self {
        self.children.push(Child::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = ElementBuilder>) -> Self {
        self.children
            .extend(children.into_iter().map(Child::Element));
        self
    }
}

impl Document {
    /// Materialize a builder into a detached subtree
    pub fn build(&mut self, builder: ElementBuilder) -> NodeId {
        let ElementBuilder {
            tag,
            attrs,
            classes,
            hidden,
            children,
        } = builder;

        let id = self.create_element(tag);
        if let Some(el) = self.element_mut(id) {
            for (name, value) in attrs {
                el.attrs.insert(name, value);
            }
            if !classes.is_empty() {
                el.attrs.insert("class".to_string(), classes.join(" "));
            }
            el.hidden = hidden;
        }

        for child in children {
            let child_id = match child {
                Child::Element(b) => self.build(b),
                Child::Text(t) => self.create_text(t),
            };
            self.adopt(id, child_id);
        }
        id
    }

    /// Build several siblings into a fragment
    pub fn build_fragment(&mut self, items: impl IntoIterator<Item = ElementBuilder>) -> NodeId {
        let fragment = self.create_fragment();
        for item in items {
            let child = self.build(item);
            self.adopt(fragment, child);
        }
        fragment
    }
}
