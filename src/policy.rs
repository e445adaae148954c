//! Role based authorisation. Every handler asks the same question through
//! [`authorize`] instead of matching on roles itself.

use crate::auth::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read drafts and scheduled quotes.
    ViewUnpublished,
    CreateQuote,
    /// Update, transition or delete a quote; `own` when the caller created it.
    EditQuote { own: bool },
    ManageCategories,
    ManageUsers,
    ViewUser { own: bool },
    ViewGlobalStats,
    ViewUserStats { own: bool },
    ManageScheduler,
}

pub fn authorize(role: Role, action: Action) -> bool {
    match role {
        Role::Admin => true,
        Role::User => match action {
            Action::CreateQuote | Action::ViewGlobalStats => true,
            Action::EditQuote { own } | Action::ViewUser { own } | Action::ViewUserStats { own } => own,
            Action::ViewUnpublished
            | Action::ManageCategories
            | Action::ManageUsers
            | Action::ManageScheduler => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_do_everything() {
        for action in [
            Action::ViewUnpublished,
            Action::CreateQuote,
            Action::EditQuote { own: false },
            Action::ManageCategories,
            Action::ManageUsers,
            Action::ViewUser { own: false },
            Action::ViewGlobalStats,
            Action::ViewUserStats { own: false },
            Action::ManageScheduler,
        ] {
            assert!(authorize(Role::Admin, action), "{action:?}");
        }
    }

    #[test]
    fn user_is_limited_to_own_content() {
        assert!(authorize(Role::User, Action::CreateQuote));
        assert!(authorize(Role::User, Action::EditQuote { own: true }));
        assert!(!authorize(Role::User, Action::EditQuote { own: false }));
        assert!(authorize(Role::User, Action::ViewUser { own: true }));
        assert!(!authorize(Role::User, Action::ViewUser { own: false }));
        assert!(!authorize(Role::User, Action::ViewUnpublished));
        assert!(!authorize(Role::User, Action::ManageCategories));
        assert!(!authorize(Role::User, Action::ManageUsers));
        assert!(!authorize(Role::User, Action::ManageScheduler));
    }
}
