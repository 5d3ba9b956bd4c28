// Pure rules
pub mod eligibility;
pub mod order_status;
pub mod outcome;

// Incentive ledgers
pub mod loyalty;
pub mod promotions;
pub mod referrals;
pub mod rewards;

// Orders and the request-facing pipeline
pub mod orders;
pub mod pricing;
