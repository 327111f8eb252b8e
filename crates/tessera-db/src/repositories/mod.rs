//! Repository implementations
//!
//! Concrete implementations of the repository traits defined in
//! tessera-core, using sqlx for PostgreSQL access.

pub mod cus_product_repo;
pub mod customer_repo;
pub mod entitlement_repo;
pub mod entity_repo;
pub mod feature_repo;
pub mod organization_repo;
pub mod product_repo;

pub use cus_product_repo::PgCustomerProductRepository;
pub use customer_repo::PgCustomerRepository;
pub use entitlement_repo::PgEntitlementRepository;
pub use entity_repo::PgEntityRepository;
pub use feature_repo::PgFeatureRepository;
pub use organization_repo::PgOrganizationRepository;
pub use product_repo::PgProductRepository;
