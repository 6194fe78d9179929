//! Projects, their statuses and who may manage them
//!
//! The chain service only needs two narrow capabilities from the project side: setting a named
//! status and answering "may this user manage this project". [`ProjectDirectory`] provides both
//! on top of sled.
use super::error::ChainError;
use super::repository::{abort, decode_tx, encode_tx};
use super::types::{ProjectId, StatusId, UserId};
use super::utils::{self, STATUS_HRP};
use sled::transaction::TransactionResult;
use tracing::info;

const PROJECTS_TREE: &str = "projects";
const STATUSES_TREE: &str = "project_statuses";

pub const COMPLETED_STATUS: &str = "Completed";

pub trait ProjectStatusGateway {
    fn resolve_status_by_name(&self, name: &str) -> anyhow::Result<Option<StatusId>>;
    fn set_project_status(&self, project: &ProjectId, status: &StatusId) -> anyhow::Result<()>;
}

pub trait AuthorizationOracle {
    /// True for the project owner and for users holding the manager role.
    fn can_manage(&self, user: &UserId, project: &ProjectId) -> anyhow::Result<bool>;

    /// True for anyone belonging to the project: its owner, managers and members.
    fn is_affiliated(&self, user: &UserId, project: &ProjectId) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectRole {
    Member,
    Manager,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ProjectRecord {
    #[n(0)]
    pub id: ProjectId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub owner: UserId,
    #[n(3)]
    pub managers: Vec<UserId>,
    #[n(4)]
    pub members: Vec<UserId>,
    #[n(5)]
    pub status: Option<StatusId>,
}

#[derive(Clone)]
pub struct ProjectDirectory {
    projects: sled::Tree,
    statuses: sled::Tree,
}

impl ProjectRecord {
    pub fn new(id: ProjectId, name: String, owner: UserId) -> Self {
        Self {
            id,
            name,
            owner,
            managers: vec![],
            members: vec![],
            status: None,
        }
    }
    pub fn is_manager(&self, user: &UserId) -> bool {
        &self.owner == user || self.managers.contains(user)
    }
    pub fn is_affiliated(&self, user: &UserId) -> bool {
        self.is_manager(user) || self.members.contains(user)
    }
}

impl ProjectDirectory {
    pub fn open(db: &sled::Db) -> Result<Self, ChainError> {
        Ok(Self {
            projects: db.open_tree(PROJECTS_TREE)?,
            statuses: db.open_tree(STATUSES_TREE)?,
        })
    }

    pub fn register_project(&self, record: ProjectRecord) -> Result<ProjectRecord, ChainError> {
        let encoded = minicbor::to_vec(&record)?;
        let swapped = self
            .projects
            .compare_and_swap(record.id.as_bytes(), None as Option<&[u8]>, Some(encoded))?;

        if swapped.is_err() {
            return Err(ChainError::ValidationFailed(format!(
                "project {} already exists",
                record.id
            )));
        }

        info!(project = %record.id, owner = %record.owner, "registered project");
        Ok(record)
    }

    pub fn project(&self, id: &ProjectId) -> Result<Option<ProjectRecord>, ChainError> {
        match self.projects.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Affiliate a user with a project. Adding someone twice is a no-op.
    pub fn add_member(
        &self,
        project: &ProjectId,
        user: &UserId,
        role: ProjectRole,
    ) -> Result<ProjectRecord, ChainError> {
        let result: TransactionResult<ProjectRecord, ChainError> =
            self.projects.transaction(|projects| {
                let Some(bytes) = projects.get(project.as_bytes())? else {
                    return Err(abort(ChainError::ValidationFailed(format!(
                        "project {project} does not exist"
                    ))));
                };
                let mut record: ProjectRecord = decode_tx(&bytes)?;

                let list = match role {
                    ProjectRole::Member => &mut record.members,
                    ProjectRole::Manager => &mut record.managers,
                };
                if !list.contains(user) {
                    list.push(user.clone());
                    projects.insert(project.as_bytes(), encode_tx(&record)?)?;
                }

                Ok(record)
            });

        Ok(result?)
    }

    /// Look up a status by name, creating it when missing.
    pub fn ensure_status(&self, name: &str) -> Result<StatusId, ChainError> {
        let candidate = StatusId::new(utils::new_uuid_to_bech32(STATUS_HRP)?);

        let result: TransactionResult<StatusId, ChainError> =
            self.statuses.transaction(|statuses| {
                if let Some(bytes) = statuses.get(name.as_bytes())? {
                    return decode_tx(&bytes);
                }
                statuses.insert(name.as_bytes(), encode_tx(&candidate)?)?;
                Ok(candidate.clone())
            });

        Ok(result?)
    }
}

impl ProjectStatusGateway for ProjectDirectory {
    fn resolve_status_by_name(&self, name: &str) -> anyhow::Result<Option<StatusId>> {
        match self.statuses.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_project_status(&self, project: &ProjectId, status: &StatusId) -> anyhow::Result<()> {
        let result: TransactionResult<(), ChainError> = self.projects.transaction(|projects| {
            let Some(bytes) = projects.get(project.as_bytes())? else {
                return Err(abort(ChainError::ValidationFailed(format!(
                    "project {project} does not exist"
                ))));
            };
            let mut record: ProjectRecord = decode_tx(&bytes)?;
            record.status = Some(status.clone());
            projects.insert(project.as_bytes(), encode_tx(&record)?)?;
            Ok(())
        });

        result.map_err(ChainError::from)?;
        Ok(())
    }
}

impl AuthorizationOracle for ProjectDirectory {
    fn can_manage(&self, user: &UserId, project: &ProjectId) -> anyhow::Result<bool> {
        Ok(self
            .project(project)?
            .is_some_and(|record| record.is_manager(user)))
    }

    fn is_affiliated(&self, user: &UserId, project: &ProjectId) -> anyhow::Result<bool> {
        Ok(self
            .project(project)?
            .is_some_and(|record| record.is_affiliated(user)))
    }
}
