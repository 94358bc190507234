//! Business entity kinds synchronized by the daemon.

use serde::{Deserialize, Serialize};

/// Success messages shown after each mutation verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationMessages {
    pub create: String,
    pub update: String,
    pub delete: String,
}

impl MutationMessages {
    pub fn new(create: &str, update: &str, delete: &str) -> Self {
        Self {
            create: create.to_string(),
            update: update.to_string(),
            delete: delete.to_string(),
        }
    }
}

/// One kind of team-scoped business record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    AfterSales,
    Kpi,
    Competitors,
    SalesStrategies,
    Debt,
    Tasks,
    MyProducts,
}

impl EntityKind {
    /// Every kind that has an entity store.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::AfterSales,
        EntityKind::Kpi,
        EntityKind::Competitors,
        EntityKind::SalesStrategies,
        EntityKind::Debt,
        EntityKind::Tasks,
        EntityKind::MyProducts,
    ];

    /// Kinds composed into the team dashboard view.
    pub const TEAM_VIEW: [EntityKind; 6] = [
        EntityKind::AfterSales,
        EntityKind::Kpi,
        EntityKind::Competitors,
        EntityKind::SalesStrategies,
        EntityKind::Debt,
        EntityKind::Tasks,
    ];

    /// Resource segment on the remote API.
    pub fn resource(&self) -> &'static str {
        match self {
            EntityKind::AfterSales => "aftersales",
            EntityKind::Kpi => "kpi",
            EntityKind::Competitors => "competitor",
            EntityKind::SalesStrategies => "sales",
            EntityKind::Debt => "debt",
            EntityKind::Tasks => "tasks",
            EntityKind::MyProducts => "myproducts",
        }
    }

    /// Field holding the list in a remote `getAll` response.
    pub fn list_field(&self) -> &'static str {
        match self {
            EntityKind::SalesStrategies => "strategies",
            _ => "records",
        }
    }

    /// Path segment on the local API.
    pub fn slug(&self) -> &'static str {
        match self {
            EntityKind::AfterSales => "aftersales",
            EntityKind::Kpi => "kpi",
            EntityKind::Competitors => "competitors",
            EntityKind::SalesStrategies => "strategies",
            EntityKind::Debt => "debt",
            EntityKind::Tasks => "tasks",
            EntityKind::MyProducts => "products",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }

    /// Human-readable plural used in log lines and fallback error messages.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::AfterSales => "after sales records",
            EntityKind::Kpi => "KPI records",
            EntityKind::Competitors => "competitor records",
            EntityKind::SalesStrategies => "sales strategies",
            EntityKind::Debt => "debt records",
            EntityKind::Tasks => "tasks",
            EntityKind::MyProducts => "my products",
        }
    }

    pub fn messages(&self) -> MutationMessages {
        match self {
            EntityKind::AfterSales => MutationMessages::new(
                "Customer added successfully",
                "Customer updated successfully",
                "Customer deleted successfully",
            ),
            EntityKind::Kpi => MutationMessages::new(
                "KPI added successfully",
                "KPI updated successfully",
                "KPI deleted successfully",
            ),
            EntityKind::Competitors => MutationMessages::new(
                "Competitor added successfully",
                "Competitor updated successfully",
                "Competitor deleted successfully",
            ),
            EntityKind::SalesStrategies => MutationMessages::new(
                "Strategy added successfully",
                "Strategy updated successfully",
                "Strategy deleted successfully",
            ),
            EntityKind::Debt => MutationMessages::new(
                "Payment record added successfully",
                "Payment record updated successfully",
                "Payment record deleted successfully",
            ),
            EntityKind::Tasks => MutationMessages::new(
                "Task created successfully",
                "Task updated successfully",
                "Task deleted successfully",
            ),
            EntityKind::MyProducts => MutationMessages::new(
                "Product added successfully",
                "Product updated successfully",
                "Product deleted successfully",
            ),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip_for_every_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_slug(kind.slug()), Some(kind));
        }
        assert_eq!(EntityKind::from_slug("invoices"), None);
    }

    #[test]
    fn test_sales_strategies_use_their_own_list_field() {
        assert_eq!(EntityKind::SalesStrategies.list_field(), "strategies");
        assert_eq!(EntityKind::Debt.list_field(), "records");
        assert_eq!(EntityKind::Competitors.resource(), "competitor");
    }

    #[test]
    fn test_team_view_excludes_products() {
        assert!(!EntityKind::TEAM_VIEW.contains(&EntityKind::MyProducts));
        assert_eq!(EntityKind::TEAM_VIEW.len() + 1, EntityKind::ALL.len());
    }
}
