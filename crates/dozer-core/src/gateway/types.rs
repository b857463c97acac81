/// Capabilities / feature flags of a gateway implementation.
#[derive(Clone, Copy, Debug)]
pub struct GatewayCapabilities {
    pub supports_edit: bool,
    pub supports_reactions: bool,
    /// Whether reactions are per-user and can be removed individually.
    pub supports_reaction_removal: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageField {
    pub name: String,
    pub value: String,
}

impl PageField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One renderable screen of output (embed-like).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub description: String,
    pub fields: Vec<PageField>,
    pub footer: Option<String>,
}

impl Page {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(PageField::new(name, value));
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}
