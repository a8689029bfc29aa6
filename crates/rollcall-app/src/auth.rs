//! Who is sitting at the console.

use rollcall_store::{Store, StoreError, Student};

/// Login state of the console. At most one student is logged in at a time.
#[derive(Debug, Default)]
pub struct AuthSession {
    current: Option<Student>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check credentials and, on success, replace the current user.
    ///
    /// Returns `Ok(false)` for an unknown id or a wrong password; the current
    /// user is left untouched in that case.
    pub fn login(&mut self, store: &Store, student_id: &str, password: &str) -> Result<bool, StoreError> {
        match store.authenticate(student_id, password)? {
            Some(student) => {
                tracing::info!(student_id = %student.student_id, "logged in");
                self.current = Some(student);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn logout(&mut self) -> Option<Student> {
        let previous = self.current.take();
        if let Some(student) = &previous {
            tracing::info!(student_id = %student.student_id, "logged out");
        }
        previous
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_user(&self) -> Option<&Student> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.register_student("s1", "pw", "Ada", "CS-1").unwrap();
        store
    }

    #[test]
    fn test_login_logout() {
        let store = store();
        let mut auth = AuthSession::new();
        assert!(!auth.is_logged_in());

        assert!(auth.login(&store, "s1", "pw").unwrap());
        assert!(auth.is_logged_in());
        assert_eq!(auth.current_user().map(|s| s.name.as_str()), Some("Ada"));

        assert_eq!(auth.logout().map(|s| s.student_id), Some("s1".to_string()));
        assert!(!auth.is_logged_in());
        assert!(auth.logout().is_none());
    }

    #[test]
    fn test_failed_login_keeps_current_user() {
        let store = store();
        let mut auth = AuthSession::new();
        auth.login(&store, "s1", "pw").unwrap();

        assert!(!auth.login(&store, "s1", "nope").unwrap());
        assert!(!auth.login(&store, "ghost", "pw").unwrap());
        assert_eq!(auth.current_user().map(|s| s.student_id.as_str()), Some("s1"));
    }
}
