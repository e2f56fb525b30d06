//! HTTP routes for roadwise

pub mod admin;
pub mod auth_routes;
pub mod certificates;
pub mod chat;
pub mod common;
pub mod courses;
pub mod enrollments;
pub mod health;
pub mod inquiries;
pub mod instructors;
pub mod payments;
pub mod results;
pub mod students;
pub mod testimonials;

pub use health::{health_check, readiness_check, version_info};

/// User id in `/api/admin/users/{id}/role`
pub fn role_path_id(path: &str) -> Option<&str> {
    path.strip_prefix("/api/admin/users/")?
        .strip_suffix("/role")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_path_id() {
        assert_eq!(role_path_id("/api/admin/users/abc/role"), Some("abc"));
        assert_eq!(role_path_id("/api/admin/users//role"), None);
        assert_eq!(role_path_id("/api/admin/users/a/b/role"), None);
        assert_eq!(role_path_id("/api/admin/users/abc"), None);
    }
}
