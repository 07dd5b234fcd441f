use serde::{Deserialize, Serialize};

use super::UserProfile;

/// Who is acting for the length of a request.
///
/// Loaded once from the profile store and handed to anything that needs to know
/// the caller, changes are saved back explicitly through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    profile: UserProfile,
}

impl Session {
    pub fn new(profile: UserProfile) -> Self {
        Self { profile }
    }

    pub fn email(&self) -> &str {
        &self.profile.email
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn into_profile(self) -> UserProfile {
        self.profile
    }

    /// Name shown next to receipts this session submits
    pub fn display_name(&self) -> String {
        Self::display_name_for(&self.profile.name, &self.profile.email)
    }

    /// Name, then email, then "Unknown"
    pub fn display_name_for(name: &str, email: &str) -> String {
        [name.trim(), email.trim()]
            .into_iter()
            .find(|value| !value.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(Session::display_name_for("Ana", "ana@example.com"), "Ana");
        assert_eq!(
            Session::display_name_for("  ", "ana@example.com"),
            "ana@example.com"
        );
        assert_eq!(Session::display_name_for("", ""), "Unknown");

        let session = Session::new(UserProfile::new("ben@example.com", ""));
        assert_eq!(session.display_name(), "ben@example.com");
        assert_eq!(session.email(), "ben@example.com");
    }
}
