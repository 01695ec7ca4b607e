use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::experiment::variants::{hash_user_id, Variant, VariantConfig, VariantRegistry};
use crate::storage::{keys, load_json, save_json, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAssignment {
    pub user_id: String,
    pub variant: Variant,
    pub assigned_at: DateTime<Utc>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub interaction_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignorStats {
    pub total_users: usize,
    pub total_interactions: u64,
    pub variant_distribution: BTreeMap<Variant, usize>,
    pub avg_interactions_per_user: f64,
}

/// Maps users to experiment arms and tracks per-user interaction counts.
///
/// The in-process map is authoritative for the running process; every change
/// is written through to the store so assignments survive restarts.
pub struct VariantAssignor {
    registry: VariantRegistry,
    store: Arc<dyn KeyValueStore>,
    assignments: RwLock<HashMap<String, UserAssignment>>,
}

impl VariantAssignor {
    pub fn new(registry: VariantRegistry, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            registry,
            store,
            assignments: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &VariantRegistry {
        &self.registry
    }

    /// Returns the user's arm, assigning one on first sight.
    pub async fn assign_variant(&self, user_id: &str) -> Variant {
        let known = self
            .assignments
            .read()
            .get(user_id)
            .map(|a| a.variant.clone());
        match known {
            Some(variant) => variant,
            None => self.load_or_create(user_id).await.variant,
        }
    }

    pub async fn get_user_config(&self, user_id: &str) -> VariantConfig {
        let variant = self.assign_variant(user_id).await;
        self.registry.config_or_control(&variant).clone()
    }

    pub fn get_assignment(&self, user_id: &str) -> Option<UserAssignment> {
        self.assignments.read().get(user_id).cloned()
    }

    /// Bumps the interaction counter. A never-seen user is assigned instead.
    pub async fn record_interaction(&self, user_id: &str) {
        let updated = {
            let mut assignments = self.assignments.write();
            assignments.get_mut(user_id).map(|assignment| {
                assignment.interaction_count += 1;
                assignment.last_interaction_at = Some(Utc::now());
                assignment.clone()
            })
        };

        match updated {
            Some(assignment) => self.persist(&assignment).await,
            None => {
                self.load_or_create(user_id).await;
            }
        }
    }

    pub fn get_stats(&self) -> AssignorStats {
        let mut variant_distribution: BTreeMap<Variant, usize> =
            self.registry.variants().map(|v| (v.clone(), 0)).collect();
        let mut total_interactions = 0u64;

        let assignments = self.assignments.read();
        for assignment in assignments.values() {
            *variant_distribution
                .entry(assignment.variant.clone())
                .or_insert(0) += 1;
            total_interactions += assignment.interaction_count;
        }

        let total_users = assignments.len();
        let avg_interactions_per_user = if total_users > 0 {
            round2(total_interactions as f64 / total_users as f64)
        } else {
            0.0
        };

        AssignorStats {
            total_users,
            total_interactions,
            variant_distribution,
            avg_interactions_per_user,
        }
    }

    async fn load_or_create(&self, user_id: &str) -> UserAssignment {
        let key = keys::assignment(user_id);
        let stored = match load_json::<UserAssignment>(self.store.as_ref(), &key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to load assignment for {user_id}: {e}");
                None
            }
        };

        let (assignment, fresh) = match stored {
            Some(assignment) => {
                debug!("Restored variant {} for {user_id}", assignment.variant);
                (assignment, false)
            }
            None => {
                let variant = self.registry.for_hash(hash_user_id(user_id)).variant.clone();
                info!("Assigned user {user_id} to variant {variant}");
                let assignment = UserAssignment {
                    user_id: user_id.to_string(),
                    variant,
                    assigned_at: Utc::now(),
                    last_interaction_at: None,
                    interaction_count: 0,
                };
                (assignment, true)
            }
        };

        // A concurrent caller may have won the race; keep whichever landed first.
        let assignment = self
            .assignments
            .write()
            .entry(user_id.to_string())
            .or_insert(assignment)
            .clone();

        if fresh {
            self.persist(&assignment).await;
        }
        assignment
    }

    async fn persist(&self, assignment: &UserAssignment) {
        let key = keys::assignment(&assignment.user_id);
        if let Err(e) = save_json(self.store.as_ref(), &key, assignment, None).await {
            warn!("Failed to persist assignment for {}: {e}", assignment.user_id);
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
