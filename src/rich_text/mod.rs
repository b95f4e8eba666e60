//! Structured rich-text document tree.
//!
//! The JSON shape is compatible with the Lexical editor state stored by the
//! CMS. Node kinds are a closed set; anything the converter never produces
//! (or attributes it does not know about) is carried through untouched so
//! that a tree read from the CMS serializes back to the same JSON.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod convert;
pub mod parser;
pub mod resolver;
pub mod visit;

fn one() -> u32 {
    1
}

/// Inline text format bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextFormat(pub u32);

impl TextFormat {
    pub const PLAIN: Self = Self(0);
    pub const BOLD: Self = Self(1);
    pub const ITALIC: Self = Self(2);
    pub const STRIKETHROUGH: Self = Self(4);
    pub const UNDERLINE: Self = Self(8);
    pub const CODE: Self = Self(16);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TextFormat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TextFormat {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

/// Element alignment. The CMS writes either a number or a string here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementFormat {
    Number(u32),
    Name(String),
}

impl Default for ElementFormat {
    fn default() -> Self {
        Self::Number(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Root,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootType {
    #[default]
    #[serde(rename = "root")]
    Root,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "type", default)]
    pub kind: RootType,
    pub children: Vec<Block>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default = "root_format")]
    pub format: ElementFormat,
    #[serde(default)]
    pub indent: u32,
    #[serde(default = "one")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn root_format() -> ElementFormat {
    ElementFormat::Name(String::new())
}

impl Document {
    pub fn new(children: Vec<Block>) -> Self {
        Self {
            root: Root {
                kind: RootType::Root,
                children,
                direction: Some(Direction::Ltr),
                format: root_format(),
                indent: 0,
                version: 1,
                extra: Map::new(),
            },
        }
    }

    /// A document holding a single paragraph of plain text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(vec![Block::Paragraph(Paragraph::new(vec![Inline::text(
            text,
            TextFormat::PLAIN,
        )]))])
    }

    pub fn blocks(&self) -> &[Block] {
        &self.root.children
    }
}

/// Block-level nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Paragraph(Paragraph),
    Heading(Heading),
    List(List),
    ListItem(ListItem),
    Quote(Quote),
    Code(Code),
    Table(Table),
    TableRow(TableRow),
    TableCell(TableCell),
    Upload(Upload),
    Block(CustomBlock),
    #[serde(untagged)]
    Other(Value),
}

/// Inline nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inline {
    Text(Text),
    Link(Link),
    #[serde(untagged)]
    Other(Value),
}

impl Inline {
    pub fn text(text: impl Into<String>, format: TextFormat) -> Self {
        Self::Text(Text::new(text, format))
    }

    /// The single-space node used for blocks that would otherwise be empty.
    pub fn space() -> Self {
        Self::text(" ", TextFormat::PLAIN)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
    #[serde(default)]
    pub format: TextFormat,
    /// Absent in trees written by some editors; kept absent on output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default = "one")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Text {
    pub fn new(text: impl Into<String>, format: TextFormat) -> Self {
        Self {
            text: text.into(),
            format,
            detail: Some(0),
            mode: Some("normal".into()),
            style: Some(String::new()),
            version: 1,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Custom,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocReference {
    pub value: Value,
    pub relation_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkFields {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub new_tab: bool,
    pub link_type: LinkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<DocReference>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LinkFields {
    pub fn is_sponsored(&self) -> bool {
        self.rel
            .as_deref()
            .is_some_and(|rel| rel.split_whitespace().any(|token| token == "sponsored"))
    }
}

/// A link node. Children are always text nodes; links never nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub fields: LinkFields,
    pub children: Vec<Inline>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default = "root_format")]
    pub format: ElementFormat,
    #[serde(default)]
    pub indent: u32,
    #[serde(default = "link_version")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn link_version() -> u32 {
    2
}

impl Link {
    pub fn new(fields: LinkFields, text: Text) -> Self {
        Self {
            fields,
            children: vec![Inline::Text(text)],
            direction: None,
            format: root_format(),
            indent: 0,
            version: link_version(),
            extra: Map::new(),
        }
    }
}

macro_rules! element {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* pub $field:ident: $ty:ty,)* } children: $child:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)*
            pub children: Vec<$child>,
            #[serde(default)]
            pub direction: Option<Direction>,
            #[serde(default)]
            pub format: ElementFormat,
            #[serde(default)]
            pub indent: u32,
            #[serde(default = "one")]
            pub version: u32,
            #[serde(flatten)]
            pub extra: Map<String, Value>,
        }

        impl $name {
            pub fn new($($field: $ty,)* children: Vec<$child>) -> Self {
                Self {
                    $($field,)*
                    children,
                    direction: None,
                    format: ElementFormat::default(),
                    indent: 0,
                    version: 1,
                    extra: Map::new(),
                }
            }
        }
    };
}

element!(Paragraph {} children: Inline);

element!(Heading {
    pub tag: HeadingTag,
} children: Inline);

element!(List {
    pub list_type: ListType,
    pub tag: ListTag,
    #[serde(default = "one")]
    pub start: u32,
} children: Block);

element!(ListItem {
    #[serde(default = "one")]
    pub value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
} children: Inline);

element!(Quote {} children: Block);

element!(Code {
    #[serde(default)]
    pub language: Option<String>,
} children: Inline);

element!(Table {} children: Block);

element!(TableRow {} children: Block);

element!(TableCell {
    pub header_state: HeaderState,
} children: Inline);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingTag {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl From<pulldown_cmark::HeadingLevel> for HeadingTag {
    fn from(level: pulldown_cmark::HeadingLevel) -> Self {
        use pulldown_cmark::HeadingLevel;
        match level {
            HeadingLevel::H1 => Self::H1,
            HeadingLevel::H2 => Self::H2,
            HeadingLevel::H3 => Self::H3,
            HeadingLevel::H4 => Self::H4,
            HeadingLevel::H5 => Self::H5,
            HeadingLevel::H6 => Self::H6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Number,
    Bullet,
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListTag {
    Ol,
    Ul,
}

/// Lexical writes either a name or its bitmask (1 row, 2 column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderState {
    Normal,
    Header,
    #[serde(untagged)]
    Flags(u32),
}

impl HeaderState {
    pub fn is_header(self) -> bool {
        match self {
            Self::Normal => false,
            Self::Header => true,
            Self::Flags(flags) => flags != 0,
        }
    }
}

/// Reference to an uploaded media document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub relation_to: String,
    pub value: Value,
    #[serde(default)]
    pub format: ElementFormat,
    #[serde(default = "one")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Upload {
    pub fn media(id: impl Into<String>) -> Self {
        Self {
            relation_to: "media".into(),
            value: serde_json::json!({ "id": id.into() }),
            format: ElementFormat::default(),
            version: 1,
            extra: Map::new(),
        }
    }
}

/// CMS-defined block (for instance a diagram).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomBlock {
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub format: ElementFormat,
    #[serde(default = "one")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CustomBlock {
    pub fn diagram(code: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("blockType".into(), "mermaidDiagram".into());
        fields.insert("blockName".into(), "".into());
        fields.insert("code".into(), Value::String(code.into()));
        Self {
            fields,
            format: ElementFormat::default(),
            version: 2,
            extra: Map::new(),
        }
    }

    pub fn block_type(&self) -> Option<&str> {
        self.fields.get("blockType").and_then(Value::as_str)
    }
}
