//! Foreign key suspension during the load and the final integrity pass.
//!
//! Tables are loaded in catalog order, not dependency order, so referential
//! triggers are switched off for the session while loading. Once every table
//! is in, each foreign key is probed for dangling references.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::identifier::{pg_ident, qualify_pg};
use crate::core::schema::ForeignKey;
use crate::core::traits::{SessionSetting, TargetWriter};
use crate::error::{MigrateError, Result};

/// Summary of the final integrity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Foreign keys probed.
    pub checked: usize,
    /// `NOT VALID` constraints promoted with `VALIDATE CONSTRAINT`.
    pub validated: usize,
}

/// Query returning whether any child row references a missing parent.
///
/// Under MATCH SIMPLE rows with a NULL in any key column are ignored. Under
/// MATCH FULL only all-NULL keys are ignored, so a partly NULL key finds no
/// parent and counts as dangling.
pub fn orphan_probe_sql(fk: &ForeignKey) -> Result<String> {
    if fk.columns.is_empty() || fk.columns.len() != fk.ref_columns.len() {
        return Err(MigrateError::Config(format!(
            "foreign key {} on {} has mismatched key columns",
            fk.name, fk.table
        )));
    }

    let mut nulls = Vec::with_capacity(fk.columns.len());
    let mut join = Vec::with_capacity(fk.columns.len());
    for (child, parent) in fk.columns.iter().zip(&fk.ref_columns) {
        let child = pg_ident(child)?;
        nulls.push(if fk.match_full {
            format!("c.{} IS NULL", child)
        } else {
            format!("c.{} IS NOT NULL", child)
        });
        join.push(format!("p.{} = c.{}", pg_ident(parent)?, child));
    }

    let filter = if fk.match_full {
        format!("NOT ({})", nulls.join(" AND "))
    } else {
        nulls.join(" AND ")
    };

    Ok(format!(
        "SELECT EXISTS (SELECT 1 FROM {} AS c WHERE {} AND NOT EXISTS \
         (SELECT 1 FROM {} AS p WHERE {}))",
        qualify_pg(&fk.schema, &fk.table)?,
        filter,
        qualify_pg(&fk.ref_schema, &fk.ref_table)?,
        join.join(" AND ")
    ))
}

/// `ALTER TABLE <t> VALIDATE CONSTRAINT <name>`
pub fn validate_constraint_sql(fk: &ForeignKey) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} VALIDATE CONSTRAINT {}",
        qualify_pg(&fk.schema, &fk.table)?,
        pg_ident(&fk.name)?
    ))
}

/// Toggles referential enforcement on the destination session.
pub struct ConstraintCoordinator {
    target: Arc<dyn TargetWriter>,
}

impl ConstraintCoordinator {
    pub fn new(target: Arc<dyn TargetWriter>) -> Self {
        Self { target }
    }

    /// Stop trigger-based enforcement for the rest of the session.
    pub async fn relax(&self) -> Result<()> {
        self.target
            .set_session(SessionSetting::ReplicationReplica)
            .await?;
        info!("Foreign key enforcement suspended for this session");
        Ok(())
    }

    /// Turn enforcement back on without checking anything.
    pub async fn restore(&self) -> Result<()> {
        self.target
            .set_session(SessionSetting::ReplicationOrigin)
            .await
    }

    /// Turn enforcement back on and check every foreign key.
    ///
    /// Fails on the first constraint with a dangling reference.
    pub async fn restore_and_validate(&self) -> Result<ValidationReport> {
        self.restore().await?;
        self.validate().await
    }

    /// Probe every foreign key for dangling references.
    ///
    /// Enforcement must already be restored for the promotion of `NOT VALID`
    /// constraints to stick.
    pub async fn validate(&self) -> Result<ValidationReport> {
        info!("Validating foreign key constraints");

        let mut report = ValidationReport::default();
        for fk in self.target.foreign_keys().await? {
            let probe = orphan_probe_sql(&fk)?;
            debug!("{}: {}", fk.name, probe);
            if self.target.exists(&probe).await? {
                warn!(
                    "Constraint {} on {} references missing {} rows",
                    fk.name, fk.table, fk.ref_table
                );
                return Err(MigrateError::constraint_violation(&fk.name, &fk.table));
            }
            report.checked += 1;

            if !fk.validated {
                let sql = validate_constraint_sql(&fk)?;
                if let Err(e) = self.target.execute(&sql).await {
                    warn!("{}: VALIDATE CONSTRAINT failed: {}", fk.name, e);
                    return Err(MigrateError::constraint_violation(&fk.name, &fk.table));
                }
                report.validated += 1;
            }
        }

        info!(
            "Validated {} foreign key(s) ({} promoted from NOT VALID)",
            report.checked, report.validated
        );
        Ok(report)
    }
}
