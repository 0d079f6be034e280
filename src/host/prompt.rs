pub(crate) struct UpPrompt {
    pub title: String,
    pub description: String,
}

pub(crate) fn account_creation_prompt(rp_id: &str) -> UpPrompt {
    UpPrompt {
        title: "vfido".to_string(),
        description: format!(
            "Register new credential\n\nSite: {rp_id}\n\nPress OK to create, or Cancel to deny."
        ),
    }
}

pub(crate) fn account_login_prompt(rp_id: &str) -> UpPrompt {
    UpPrompt {
        title: "vfido".to_string(),
        description: format!(
            "Sign in\n\nSite: {rp_id}\n\nPress OK to sign in, or Cancel to deny."
        ),
    }
}
