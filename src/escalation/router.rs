//! Agent routing for escalations

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::CallStore;
use crate::types::HumanAgent;

/// Routes escalations to available human agents.
pub struct AgentRouter {
    store: Arc<CallStore>,
}

impl AgentRouter {
    pub fn new(store: Arc<CallStore>) -> Self {
        Self { store }
    }

    /// First available + active agent, least-loaded first. Skill and
    /// department filters narrow the pool when provided.
    pub async fn find_available_agent(
        &self,
        skills: &[String],
        departments: &[String],
    ) -> Result<Option<HumanAgent>> {
        let candidates = self.store.available_agents().await?;
        let agent = candidates.into_iter().find(|agent| {
            skills.iter().all(|s| agent.skills.contains(s))
                && departments.iter().all(|d| agent.departments.contains(d))
        });

        match &agent {
            Some(agent) => info!(agent_id = %agent.id, agent_name = %agent.name, "agent found"),
            None => warn!("no available agents"),
        }
        Ok(agent)
    }

    /// Mark an agent busy while an escalation is assigned to them.
    pub async fn mark_agent_busy(&self, agent_id: &str) -> Result<()> {
        self.store.set_agent_availability(agent_id, false).await?;
        info!(agent_id = %agent_id, "agent marked busy");
        Ok(())
    }

    /// Return an agent to the pool; stamps `last_active_at`.
    pub async fn mark_agent_available(&self, agent_id: &str) -> Result<()> {
        self.store.set_agent_availability(agent_id, true).await?;
        info!(agent_id = %agent_id, "agent marked available");
        Ok(())
    }
}
