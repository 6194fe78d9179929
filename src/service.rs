//! Service layer API for approval chain operations
use super::chain::{ApprovalChain, Transition, check_approvers};
use super::config::{ChainConfig, MissingStatusPolicy};
use super::error::ChainError;
use super::project::{AuthorizationOracle, ProjectDirectory, ProjectStatusGateway};
use super::record::ChainUserRecord;
use super::repository::{ChainRepository, SledChainRepository};
use super::types::{ChainId, ProjectId, StatusId, TimeStamp, UserId};
use tracing::{debug, info, warn};

/// Filter for chain listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveFilter {
    #[default]
    All,
    Active,
    Inactive,
}

/// The result of an approval: the chain as stored afterwards and what the approval did.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub chain: ApprovalChain,
    pub transition: Transition,
}

impl ApprovalOutcome {
    pub fn current_approver(&self) -> Option<&ChainUserRecord> {
        self.chain.current_approver()
    }
    pub fn is_completed(&self) -> bool {
        self.chain.is_completed()
    }
}

pub struct ChainService<R, G, A> {
    chains: R,
    gateway: G,
    oracle: A,
    config: ChainConfig,
}

pub type SledChainService = ChainService<SledChainRepository, ProjectDirectory, ProjectDirectory>;

impl SledChainService {
    /// Wire the service to the chain and project trees of one sled database.
    pub fn open(db: &sled::Db, config: ChainConfig) -> Result<Self, ChainError> {
        let projects = ProjectDirectory::open(db)?;
        Ok(ChainService::new(
            SledChainRepository::open(db)?,
            projects.clone(),
            projects,
            config,
        ))
    }
}

impl ActiveFilter {
    fn admits(&self, chain: &ApprovalChain) -> bool {
        match self {
            ActiveFilter::All => true,
            ActiveFilter::Active => chain.active,
            ActiveFilter::Inactive => !chain.active,
        }
    }
}

impl<R, G, A> ChainService<R, G, A>
where
    R: ChainRepository,
    G: ProjectStatusGateway,
    A: AuthorizationOracle,
{
    pub fn new(chains: R, gateway: G, oracle: A, config: ChainConfig) -> Self {
        Self {
            chains,
            gateway,
            oracle,
            config,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Start a new approval chain for a project, replacing whichever chain was active before.
    ///
    /// The approvers approve in the order given; the first one becomes the current approver.
    /// Every approver must belong to the project.
    pub fn create(
        &self,
        project: &ProjectId,
        creator: &UserId,
        approvers: &[UserId],
    ) -> Result<ApprovalChain, ChainError> {
        check_approvers(approvers)?;
        self.ensure_can_manage(creator, project)?;

        for approver in approvers {
            if !self.oracle.is_affiliated(approver, project)? {
                return Err(ChainError::ValidationFailed(format!(
                    "approver {approver} does not belong to project {project}"
                )));
            }
        }

        let chain = ApprovalChain::new(project.clone(), creator.clone(), approvers)?;
        self.chains.create_chain_with_records(&chain)?;

        info!(
            chain = %chain.id,
            project = %project,
            creator = %creator,
            approvers = approvers.len(),
            "created approval chain"
        );

        Ok(chain)
    }

    /// Approve on behalf of the chain's current approver and forward to the next one.
    ///
    /// A completed chain whose project status update failed is left marked as pending; the final
    /// approver repeating the approval applies the status again.
    pub fn approve_current(
        &self,
        chain_id: &ChainId,
        acting: &UserId,
    ) -> Result<ApprovalOutcome, ChainError> {
        let completion = self.completion_status()?;
        let policy = self.config.missing_status_policy;

        let (mut chain, transition) = self
            .chains
            .update_chain(chain_id, |chain| {
                if !chain.active && !chain.is_completed() {
                    return Err(ChainError::Inactive(chain.id.clone()));
                }
                let Some(current) = chain.current_approver() else {
                    return match chain.final_approval() {
                        Some(last)
                            if chain.completion_pending
                                && last.approved_by.as_ref() == Some(acting) =>
                        {
                            Ok(Transition::Completed {
                                approved: last.id.clone(),
                            })
                        }
                        _ => Err(ChainError::AlreadyCompleted(chain.id.clone())),
                    };
                };
                if &current.user_id != acting {
                    return Err(ChainError::NotCurrentApprover {
                        expected: current.user_id.clone(),
                        got: acting.clone(),
                    });
                }
                let completes = chain.next_approver().is_none();
                if completes && completion.is_none() && policy == MissingStatusPolicy::Fail {
                    return Err(ChainError::MissingCompletionStatus(
                        self.config.completed_status.clone(),
                    ));
                }

                let transition = chain.approve_and_forward(acting, TimeStamp::new());
                if matches!(transition, Transition::Completed { .. }) && completion.is_some() {
                    chain.completion_pending = true;
                }
                Ok(transition)
            })
            .inspect_err(|e| warn!(chain = %chain_id, user = %acting, error = %e, "approval rejected"))?;

        match &transition {
            Transition::Advanced { next, .. } => {
                info!(chain = %chain_id, user = %acting, next = %next, "approved and forwarded");
            }
            Transition::Completed { .. } => {
                info!(chain = %chain_id, user = %acting, project = %chain.project_id, "approval chain completed");
                self.complete_project(&chain.project_id, completion.as_ref())?;
                if chain.completion_pending {
                    (chain, _) = self.chains.update_chain(chain_id, |chain| {
                        chain.completion_pending = false;
                        Ok(())
                    })?;
                }
            }
            Transition::NoOp => {
                debug!(chain = %chain_id, "nothing to approve");
            }
        }

        Ok(ApprovalOutcome { chain, transition })
    }

    pub fn get_active_chain(&self, project: &ProjectId) -> Result<Option<ApprovalChain>, ChainError> {
        self.chains.find_active_chain_for_project(project)
    }

    /// Fetch one chain for display. Managers and approvers of the project's chains may view.
    pub fn view_chain(&self, chain_id: &ChainId, acting: &UserId) -> Result<ApprovalChain, ChainError> {
        let chain = self.load(chain_id)?;
        self.ensure_can_view(acting, &chain.project_id)?;
        Ok(chain)
    }

    pub fn list_chains(
        &self,
        project: &ProjectId,
        acting: &UserId,
        filter: ActiveFilter,
    ) -> Result<Vec<ApprovalChain>, ChainError> {
        self.ensure_can_view(acting, project)?;

        Ok(self
            .chains
            .chains_for_project(project)?
            .into_iter()
            .filter(|chain| filter.admits(chain))
            .collect())
    }

    pub fn delete_chain(&self, chain_id: &ChainId, acting: &UserId) -> Result<(), ChainError> {
        let chain = self.load(chain_id)?;
        self.ensure_can_manage(acting, &chain.project_id)?;

        self.chains.delete_chain(chain_id)?;
        info!(chain = %chain_id, user = %acting, "deleted approval chain");

        Ok(())
    }

    /// Delete several chains at once. Authorization is checked for every chain before any is
    /// removed; an empty selection is refused.
    pub fn delete_chains(&self, chain_ids: &[ChainId], acting: &UserId) -> Result<usize, ChainError> {
        if chain_ids.is_empty() {
            return Err(ChainError::Unauthorized(acting.clone()));
        }

        for chain_id in chain_ids {
            let chain = self.load(chain_id)?;
            self.ensure_can_manage(acting, &chain.project_id)?;
        }

        let mut deleted = 0;
        for chain_id in chain_ids {
            if self.chains.delete_chain(chain_id)? {
                deleted += 1;
            }
        }
        info!(user = %acting, deleted, "deleted approval chains");

        Ok(deleted)
    }

    fn load(&self, chain_id: &ChainId) -> Result<ApprovalChain, ChainError> {
        self.chains
            .find_chain(chain_id)?
            .ok_or_else(|| ChainError::NotFound(chain_id.clone()))
    }

    fn ensure_can_manage(&self, user: &UserId, project: &ProjectId) -> Result<(), ChainError> {
        if self.oracle.can_manage(user, project)? {
            return Ok(());
        }
        warn!(user = %user, project = %project, "user may not manage approval chains");
        Err(ChainError::Unauthorized(user.clone()))
    }

    // approvers of any chain on the project may look at its chains
    fn ensure_can_view(&self, user: &UserId, project: &ProjectId) -> Result<(), ChainError> {
        if self.oracle.can_manage(user, project)? {
            return Ok(());
        }
        let is_approver = self
            .chains
            .chains_for_project(project)?
            .iter()
            .any(|chain| chain.has_approver(user));
        if is_approver {
            return Ok(());
        }
        Err(ChainError::Unauthorized(user.clone()))
    }

    fn completion_status(&self) -> Result<Option<StatusId>, ChainError> {
        Ok(self
            .gateway
            .resolve_status_by_name(&self.config.completed_status)?)
    }

    fn complete_project(
        &self,
        project: &ProjectId,
        status: Option<&StatusId>,
    ) -> Result<(), ChainError> {
        match status {
            Some(status) => {
                self.gateway.set_project_status(project, status)?;
                info!(project = %project, status = %status, "project marked as completed");
            }
            None => {
                warn!(
                    project = %project,
                    status = %self.config.completed_status,
                    "completion status does not exist, project status left unchanged"
                );
            }
        }
        Ok(())
    }
}
