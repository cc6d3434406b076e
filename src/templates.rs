pub struct Template {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub content: &'static str,
}

pub const TEMPLATES: &[Template] = &[
    Template {
        key: "open-source",
        name: "Open Source Project",
        description: "Standard structure for open source projects",
        content: include_str!("templates/open_source.md"),
    },
    Template {
        key: "api-docs",
        name: "API Documentation",
        description: "Template for API reference documentation",
        content: include_str!("templates/api_docs.md"),
    },
    Template {
        key: "profile",
        name: "GitHub Profile",
        description: "Personal GitHub profile README",
        content: include_str!("templates/profile.md"),
    },
];

pub fn find(key: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_key() {
        assert_eq!(find("api-docs").map(|t| t.name), Some("API Documentation"));
        assert!(find("blog").is_none());
    }

    #[test]
    fn every_template_renders_with_a_title() {
        for template in TEMPLATES {
            let html = crate::render::to_html(template.content);
            assert!(html.contains("<h1"), "{} has no title", template.key);
        }
    }
}
