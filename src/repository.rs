//! Chain persistence on sled
//!
//! Chains are stored whole, records included, CBOR encoded under their id in the `chains` tree.
//! The `project_chains` tree maps a project to the ids of its chains in creation order. Every
//! mutation touching more than one key runs in a sled transaction, so concurrent callers are
//! serialized by sled's conflict detection and retried.
use super::chain::ApprovalChain;
use super::error::ChainError;
use super::types::{ChainId, ProjectId};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionResult,
    TransactionalTree,
};
use tracing::{debug, warn};

const CHAINS_TREE: &str = "chains";
const PROJECT_CHAINS_TREE: &str = "project_chains";

/// Storage contract the chain service relies on.
pub trait ChainRepository {
    fn find_chain(&self, id: &ChainId) -> Result<Option<ApprovalChain>, ChainError>;

    fn find_active_chain_for_project(
        &self,
        project: &ProjectId,
    ) -> Result<Option<ApprovalChain>, ChainError>;

    /// All chains of a project, oldest first. Chains that fail to decode or validate are skipped.
    fn chains_for_project(&self, project: &ProjectId) -> Result<Vec<ApprovalChain>, ChainError>;

    /// Insert `chain` with its records, deactivating every other chain of the same project in
    /// the same atomic step.
    fn create_chain_with_records(&self, chain: &ApprovalChain) -> Result<(), ChainError>;

    /// Returns how many chains were switched off.
    fn deactivate_all_chains_for_project(&self, project: &ProjectId) -> Result<usize, ChainError>;

    /// Atomic read-modify-write of one chain. `f` sees the latest stored state and may run more
    /// than once if a concurrent writer wins; nothing is written when `f` fails or leaves the
    /// chain unchanged.
    fn update_chain<T, F>(&self, id: &ChainId, f: F) -> Result<(ApprovalChain, T), ChainError>
    where
        F: Fn(&mut ApprovalChain) -> Result<T, ChainError>;

    /// Removes the chain and its records. Returns false if it did not exist.
    fn delete_chain(&self, id: &ChainId) -> Result<bool, ChainError>;
}

#[derive(Clone)]
pub struct SledChainRepository {
    chains: sled::Tree,
    project_chains: sled::Tree,
}

impl SledChainRepository {
    pub fn open(db: &sled::Db) -> Result<Self, ChainError> {
        Ok(Self {
            chains: db.open_tree(CHAINS_TREE)?,
            project_chains: db.open_tree(PROJECT_CHAINS_TREE)?,
        })
    }

    fn chain_ids(&self, project: &ProjectId) -> Result<Vec<ChainId>, ChainError> {
        match self.project_chains.get(project.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Ok(vec![]),
        }
    }
}

impl ChainRepository for SledChainRepository {
    fn find_chain(&self, id: &ChainId) -> Result<Option<ApprovalChain>, ChainError> {
        let Some(bytes) = self.chains.get(id.as_bytes())? else {
            return Ok(None);
        };

        let chain: ApprovalChain = minicbor::decode(&bytes)?;
        chain.validate()?;

        Ok(Some(chain))
    }

    fn find_active_chain_for_project(
        &self,
        project: &ProjectId,
    ) -> Result<Option<ApprovalChain>, ChainError> {
        Ok(self
            .chains_for_project(project)?
            .into_iter()
            .find(|chain| chain.active))
    }

    fn chains_for_project(&self, project: &ProjectId) -> Result<Vec<ApprovalChain>, ChainError> {
        let mut chains = vec![];
        for id in self.chain_ids(project)? {
            match self.find_chain(&id) {
                Ok(Some(chain)) => chains.push(chain),
                Ok(None) => {}
                Err(e @ (ChainError::Corrupt(_) | ChainError::Decode(_))) => {
                    warn!(chain = %id, project = %project, error = %e, "skipping unreadable approval chain");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(chains)
    }

    fn create_chain_with_records(&self, chain: &ApprovalChain) -> Result<(), ChainError> {
        chain.validate()?;

        let result: TransactionResult<usize, ChainError> = (&self.chains, &self.project_chains)
            .transaction(|(chains, index)| {
                if chains.get(chain.id.as_bytes())?.is_some() {
                    return Err(abort(ChainError::ValidationFailed(format!(
                        "approval chain {} already exists",
                        chain.id
                    ))));
                }

                let deactivated = deactivate_in(chains, index, &chain.project_id)?;

                chains.insert(chain.id.as_bytes(), encode_tx(chain)?)?;

                let mut ids = chain_ids_in(index, &chain.project_id)?;
                ids.push(chain.id.clone());
                index.insert(chain.project_id.as_bytes(), encode_tx(&ids)?)?;

                Ok(deactivated)
            });

        let deactivated = result?;
        debug!(chain = %chain.id, project = %chain.project_id, deactivated, "stored approval chain");

        Ok(())
    }

    fn deactivate_all_chains_for_project(&self, project: &ProjectId) -> Result<usize, ChainError> {
        let result: TransactionResult<usize, ChainError> = (&self.chains, &self.project_chains)
            .transaction(|(chains, index)| deactivate_in(chains, index, project));

        Ok(result?)
    }

    fn update_chain<T, F>(&self, id: &ChainId, f: F) -> Result<(ApprovalChain, T), ChainError>
    where
        F: Fn(&mut ApprovalChain) -> Result<T, ChainError>,
    {
        let result: TransactionResult<(ApprovalChain, T), ChainError> =
            self.chains.transaction(|chains| {
                let Some(bytes) = chains.get(id.as_bytes())? else {
                    return Err(abort(ChainError::NotFound(id.clone())));
                };

                let mut chain: ApprovalChain = decode_tx(&bytes)?;
                chain.validate().map_err(abort)?;

                let before = chain.clone();
                let out = f(&mut chain).map_err(ConflictableTransactionError::Abort)?;

                if chain != before {
                    chain.validate().map_err(abort)?;
                    chains.insert(id.as_bytes(), encode_tx(&chain)?)?;
                }

                Ok((chain, out))
            });

        Ok(result?)
    }

    fn delete_chain(&self, id: &ChainId) -> Result<bool, ChainError> {
        let result: TransactionResult<bool, ChainError> = (&self.chains, &self.project_chains)
            .transaction(|(chains, index)| {
                let Some(bytes) = chains.remove(id.as_bytes())? else {
                    return Ok(false);
                };
                let chain: ApprovalChain = decode_tx(&bytes)?;

                let mut ids = chain_ids_in(index, &chain.project_id)?;
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    index.remove(chain.project_id.as_bytes())?;
                } else {
                    index.insert(chain.project_id.as_bytes(), encode_tx(&ids)?)?;
                }

                Ok(true)
            });

        Ok(result?)
    }
}

fn deactivate_in(
    chains: &TransactionalTree,
    index: &TransactionalTree,
    project: &ProjectId,
) -> ConflictableTransactionResult<usize, ChainError> {
    let mut deactivated = 0;
    for id in chain_ids_in(index, project)? {
        let Some(bytes) = chains.get(id.as_bytes())? else {
            continue;
        };
        let mut chain: ApprovalChain = decode_tx(&bytes)?;
        if chain.active {
            chain.active = false;
            chains.insert(id.as_bytes(), encode_tx(&chain)?)?;
            deactivated += 1;
        }
    }
    Ok(deactivated)
}

fn chain_ids_in(
    index: &TransactionalTree,
    project: &ProjectId,
) -> ConflictableTransactionResult<Vec<ChainId>, ChainError> {
    match index.get(project.as_bytes())? {
        Some(bytes) => decode_tx(&bytes),
        None => Ok(vec![]),
    }
}

pub(crate) fn abort<E: Into<ChainError>>(e: E) -> ConflictableTransactionError<ChainError> {
    ConflictableTransactionError::Abort(e.into())
}

pub(crate) fn encode_tx<T: minicbor::Encode<()>>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<ChainError>> {
    minicbor::to_vec(value).map_err(abort)
}

pub(crate) fn decode_tx<T>(bytes: &[u8]) -> Result<T, ConflictableTransactionError<ChainError>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(abort)
}
