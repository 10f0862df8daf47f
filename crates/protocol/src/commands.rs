//! Command and action tags.
//!
//! Envelopes carry their tag as a free-form string; these enums give the
//! service a closed set to match on while keeping unknown tags around for
//! diagnostics.

/// The `command` tag of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reply,
    Proxy,
    Plugin,
    Uxp,
    App,
    Cdt,
    CdtBrowser,
    InitRuntimeClient,
    Other(String),
}

impl Command {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "reply" => Self::Reply,
            "proxy" => Self::Proxy,
            "Plugin" => Self::Plugin,
            "UXP" => Self::Uxp,
            "App" => Self::App,
            "CDT" => Self::Cdt,
            "CDTBrowser" => Self::CdtBrowser,
            "initRuntimeClient" => Self::InitRuntimeClient,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Reply => "reply",
            Self::Proxy => "proxy",
            Self::Plugin => "Plugin",
            Self::Uxp => "UXP",
            Self::App => "App",
            Self::Cdt => "CDT",
            Self::CdtBrowser => "CDTBrowser",
            Self::InitRuntimeClient => "initRuntimeClient",
            Self::Other(tag) => tag,
        }
    }
}

/// The `action` of a `Plugin` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginAction {
    Load,
    Unload,
    Reload,
    Debug,
    List,
    Validate,
    Discover,
    CdtConnected,
    CdtDisconnected,
    Other(String),
}

impl PluginAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "load" => Self::Load,
            "unload" => Self::Unload,
            "reload" => Self::Reload,
            "debug" => Self::Debug,
            "list" => Self::List,
            "validate" => Self::Validate,
            "discover" => Self::Discover,
            "cdtConnected" => Self::CdtConnected,
            "cdtDisconnected" => Self::CdtDisconnected,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Load => "load",
            Self::Unload => "unload",
            Self::Reload => "reload",
            Self::Debug => "debug",
            Self::List => "list",
            Self::Validate => "validate",
            Self::Discover => "discover",
            Self::CdtConnected => "cdtConnected",
            Self::CdtDisconnected => "cdtDisconnected",
            Self::Other(action) => action,
        }
    }
}
