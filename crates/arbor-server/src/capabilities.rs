use serde_json::{json, Value};

/// Everything an availability predicate may look at. Pure with respect to
/// the bridge's own reachable state; populated fresh for every probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProbeContext {
    pub browsers_connected: usize,
    pub extensions_connected: usize,
    pub mail_configured: bool,
    pub repo_available: bool,
}

/// One action within a capability family.
pub struct ActionDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Tool the action maps to, when the assistant invokes it directly.
    pub forwarded_tool: Option<&'static str>,
}

/// A capability family with a runtime availability predicate.
pub struct CapabilityFamily {
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub actions: &'static [ActionDescriptor],
    available: fn(&ProbeContext) -> bool,
}

impl CapabilityFamily {
    /// Evaluated on demand; never cached across calls.
    pub fn available(&self, ctx: &ProbeContext) -> bool {
        (self.available)(ctx)
    }
}

/// The static capability table.
pub fn families() -> &'static [CapabilityFamily] {
    FAMILIES
}

static FAMILIES: &[CapabilityFamily] = &[
    CapabilityFamily {
        name: "email",
        category: "integration",
        description: "Search and mutate mail through the bridge's mail provider",
        actions: &[
            ActionDescriptor {
                name: "search_mail",
                description: "Search messages with a query string",
                forwarded_tool: Some("gmail_search"),
            },
            ActionDescriptor {
                name: "archive_mail",
                description: "Archive a message",
                forwarded_tool: Some("gmail_archive"),
            },
        ],
        available: |ctx| ctx.mail_configured,
    },
    CapabilityFamily {
        name: "development",
        category: "integration",
        description: "Repository queries through the gh CLI",
        actions: &[
            ActionDescriptor {
                name: "list_pull_requests",
                description: "List open pull requests",
                forwarded_tool: Some("github_pr_list"),
            },
            ActionDescriptor {
                name: "list_issues",
                description: "List open issues",
                forwarded_tool: Some("github_issue_list"),
            },
        ],
        available: |ctx| ctx.repo_available,
    },
    CapabilityFamily {
        name: "browser",
        category: "peer",
        description: "Actions performed by the browser extension",
        actions: &[ActionDescriptor {
            name: "capture_screen",
            description: "Capture the visible tab",
            forwarded_tool: Some("ext_capture_screen"),
        }],
        available: |ctx| ctx.extensions_connected > 0,
    },
    CapabilityFamily {
        name: "filesystem",
        category: "local",
        description: "Open local files with the platform default application",
        actions: &[ActionDescriptor {
            name: "open_file",
            description: "Open a local file",
            forwarded_tool: Some("open_local_file"),
        }],
        available: |_| true,
    },
    CapabilityFamily {
        name: "tree",
        category: "peer",
        description: "Tree operations executed in a connected tab",
        actions: &[
            ActionDescriptor {
                name: "read_tree",
                description: "Read the tree or a single node",
                forwarded_tool: Some("get_tree"),
            },
            ActionDescriptor {
                name: "edit_tree",
                description: "Create, update, move, or delete nodes",
                forwarded_tool: Some("update_node"),
            },
        ],
        available: |ctx| ctx.browsers_connected > 0,
    },
];

/// The probed view returned by `cc_get_capabilities` and the
/// `get_cc_capabilities` browser frame.
pub fn render(ctx: &ProbeContext) -> Value {
    let rendered: Vec<Value> = families()
        .iter()
        .map(|family| {
            json!({
                "name": family.name,
                "category": family.category,
                "description": family.description,
                "available": family.available(ctx),
                "actions": family
                    .actions
                    .iter()
                    .map(|a| {
                        json!({
                            "name": a.name,
                            "description": a.description,
                            "tool": a.forwarded_tool,
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({"capabilities": rendered})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_are_stable() {
        let names: Vec<&str> = families().iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["email", "development", "browser", "filesystem", "tree"]
        );
    }

    #[test]
    fn availability_follows_probe_context() {
        let ctx = ProbeContext {
            browsers_connected: 1,
            extensions_connected: 0,
            mail_configured: false,
            repo_available: true,
        };
        let by_name = |name: &str| {
            families()
                .iter()
                .find(|f| f.name == name)
                .unwrap()
                .available(&ctx)
        };
        assert!(!by_name("email"));
        assert!(by_name("development"));
        assert!(!by_name("browser"));
        assert!(by_name("filesystem"));
        assert!(by_name("tree"));
    }

    #[test]
    fn render_includes_availability_and_actions() {
        let ctx = ProbeContext {
            extensions_connected: 1,
            ..Default::default()
        };
        let view = render(&ctx);
        let caps = view["capabilities"].as_array().unwrap();
        assert_eq!(caps.len(), families().len());

        let browser = caps.iter().find(|c| c["name"] == "browser").unwrap();
        assert_eq!(browser["available"], true);
        assert_eq!(browser["actions"][0]["name"], "capture_screen");
        assert_eq!(browser["actions"][0]["tool"], "ext_capture_screen");

        let tree = caps.iter().find(|c| c["name"] == "tree").unwrap();
        assert_eq!(tree["available"], false);
    }
}
