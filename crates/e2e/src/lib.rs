pub mod client;
pub mod fixtures;
pub mod runner;
pub mod specs;

/// Invoke `$mac!(module::name)` for every E2E spec.
///
/// Single source of truth for the spec list: `runner::run_all` and
/// `tests/server.rs` both expand it.
#[macro_export]
macro_rules! for_each_spec {
    ($mac:ident) => {
        // health (1)
        $mac!(health::health_check);

        // auth (6)
        $mac!(auth::register);
        $mac!(auth::register_duplicate_email);
        $mac!(auth::register_weak_password);
        $mac!(auth::login);
        $mac!(auth::refresh_rotates_token);
        $mac!(auth::requires_bearer_token);

        // tasks (4)
        $mac!(tasks::task_lifecycle);
        $mac!(tasks::task_with_stakeholders);
        $mac!(tasks::task_filters);
        $mac!(tasks::other_users_tasks_are_hidden);
    };
}
