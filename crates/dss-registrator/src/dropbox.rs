//! Dropbox item handler: one registration transaction per scanned item

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use dss_core::DssError;
use dss_scanner::{ItemHandler, ScannedStore, StoreItem};

use crate::config::RegistratorConfig;
use crate::entity::EntityKind;
use crate::error::RegistrationError;
use crate::transaction::{DataSetRegistrationTransaction, TransactionContext};

const DEFAULT_EXPERIMENT_TYPE: &str = "DEFAULT";

/// Registers every item of the dropbox as one physical data set.
pub struct DropboxItemHandler {
    ctx: TransactionContext,
    rollback_dir: PathBuf,
    staging_dir: PathBuf,
    data_set_type: String,
    experiment: Option<String>,
}

impl DropboxItemHandler {
    pub fn new(ctx: TransactionContext, config: &RegistratorConfig) -> Self {
        Self {
            ctx,
            rollback_dir: config.rollback_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            data_set_type: config.data_set_type.clone(),
            experiment: config.experiment.clone(),
        }
    }

    fn register(
        &self,
        tx: &mut DataSetRegistrationTransaction,
        item: &StoreItem,
    ) -> Result<bool, RegistrationError> {
        if let Some(experiment) = &self.experiment {
            let known = self
                .ctx
                .service
                .try_get_entity(EntityKind::Experiment, experiment)?;
            if known.is_none() {
                log::info!("Creating experiment {experiment}");
                tx.create_new_experiment(experiment, DEFAULT_EXPERIMENT_TYPE)?;
            }
        }

        let data_set = tx.create_new_data_set(Some(self.data_set_type.as_str()), None)?;
        if let Some(experiment) = &self.experiment {
            data_set.set_experiment(experiment.as_str());
        }
        let code = data_set.code().to_string();
        tx.move_file(item.name(), &code, None)?;
        tx.commit()
    }
}

impl ItemHandler for DropboxItemHandler {
    fn handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> Result<()> {
        let mut tx = DataSetRegistrationTransaction::new(
            &self.rollback_dir,
            store.location(),
            &self.staging_dir,
            self.ctx.clone(),
        )
        .with_context(|| format!("cannot open transaction for {item}"))?;

        match self.register(&mut tx, item) {
            Ok(_) if tx.is_committed() => {
                if let Err(e) = store.mark_consumed(item) {
                    log::warn!("{item} registered but not marked consumed: {e}");
                }
                Ok(())
            }
            Ok(_) => bail!(
                "registration of {item} did not commit ({}): {}",
                tx.state_name(),
                tx.last_error().unwrap_or("unknown error")
            ),
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    log::error!("rollback of {item} failed: {rollback}");
                }
                if e.is_cancelled() {
                    return Err(DssError::Cancelled(e.to_string()).into());
                }
                Err(anyhow::Error::new(e).context(format!("registration of {item} failed")))
            }
        }
    }

    fn is_stop_requested(&self) -> bool {
        self.ctx.stop.is_stop_requested()
    }
}
