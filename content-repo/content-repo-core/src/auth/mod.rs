pub mod acl;
pub mod blacklist;
pub mod manager;
pub mod principal;
pub mod privilege;
pub mod roles;
pub mod token;

pub use acl::Acl;
pub use manager::{Authorization, AuthorizationManager, RepositoryAction};
pub use principal::Principal;
pub use privilege::Privilege;
pub use roles::{PrincipalManager, Role, StaticPrincipalManager};
pub use token::{JwtTokenManager, SessionTokenManager, TokenManager};
