//! Runs untrusted scripts under the Deno runtime, answering its interactive
//! permission prompts automatically according to an IP egress policy.

pub mod checker;
pub mod hostport;
pub mod limited_writer;
mod paths;
pub mod permission;
pub mod permissioner;
pub mod prompt;
pub mod runner;
pub mod scanner;

pub use checker::Checker;
pub use hostport::HostPort;
pub use permission::PermissionDescriptor;
pub use permissioner::IpPolicy;
pub use permissioner::IpPolicyPermissioner;
pub use permissioner::Permissioner;
pub use runner::Runner;
