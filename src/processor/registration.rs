//! Machine registration (`uc`), program options (`po`) and assignment
//! registration (`ra`).

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use md5::{Digest, Md5};

use crate::assignment::model::{Assignment, WorkType};
use crate::processor::coordinator::{Call, Coordinator, Recovery};
use crate::runtime::config::AgentConfig;
use crate::runtime::state::AgentState;
use crate::transport::args::{Transaction, TransactionArgs};
use crate::transport::replies::{ProgramOptionsReply, RegisteredKey, RegistrationReply};
use crate::transport::retry::{
    PROGRAM_OPTIONS_RETRY, REGISTER_ASSIGNMENT_RETRY, UPDATE_COMPUTER_RETRY,
};
use crate::transport::session::new_guid;

/// `md5(cpu_brand + machine_id)` as lowercase hex.
pub fn derive_hardware_guid(cpu_brand: &str, machine_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(cpu_brand.as_bytes());
    hasher.update(machine_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn hardware_guid(config: &AgentConfig, state: &AgentState) -> String {
    let computer = config.computer();
    computer
        .hardware_guid
        .clone()
        .or_else(|| state.hardware_guid.clone())
        .unwrap_or_else(|| derive_hardware_guid(&computer.cpu_brand, &computer.machine_id))
}

pub(crate) fn update_computer_args(
    config: &AgentConfig,
    guid: &str,
    hardware_guid: &str,
) -> TransactionArgs {
    let computer = config.computer();
    let engine = config.engine();
    TransactionArgs::new(Transaction::UpdateComputer)
        .with("g", guid)
        .with("hg", hardware_guid)
        .with("wg", "")
        .with(
            "a",
            format!(
                "{},{},v{}",
                computer.platform,
                engine.program_name(),
                engine.program_version()
            ),
        )
        .with("c", &computer.cpu_brand)
        .with("f", &computer.cpu_features)
        .with("L1", computer.l1_kib)
        .with("L2", computer.l2_kib)
        .with("np", computer.cores)
        .with("hp", computer.hyperthreads)
        .with("m", computer.memory_mib)
        .with("s", computer.frequency_mhz)
        .with("h", config.cpu_hours().round() as u64)
        .with("r", config.rolling_average().round() as u64)
        .with_opt("L3", computer.l3_kib)
        .with("u", config.username())
        .with_opt("cn", computer.computer_name.as_deref())
}

pub(crate) fn program_options_args(config: &AgentConfig, guid: &str, first_time: bool) -> TransactionArgs {
    let args = TransactionArgs::new(Transaction::ProgramOptions)
        .with("g", guid)
        .with("c", "");
    if !first_time {
        return args;
    }
    let memory = config.computer().memory_mib;
    args.with("w", config.work_preference())
        .with("nw", config.worker_dirs().len())
        .with("DaysOfWork", config.days_of_work().round() as u64)
        .with("DayMemory", memory)
        .with("NightMemory", memory)
}

pub(crate) fn register_assignment_args(guid: &str, cpu: usize, assignment: &Assignment) -> TransactionArgs {
    let args = TransactionArgs::new(Transaction::RegisterAssignment)
        .with("g", guid)
        .with("c", cpu)
        .with("w", assignment.work_type().code())
        .with("n", assignment.exponent());
    let candidate = |args: TransactionArgs| {
        args.with("A", format!("{:.0}", assignment.k()))
            .with("b", assignment.base())
            .with("C", assignment.c())
    };
    match assignment.work_type() {
        WorkType::FirstLl | WorkType::DoubleCheckLl => args
            .with("sf", assignment.sieve_depth())
            .with("p1", u8::from(assignment.pminus1_done())),
        WorkType::Prp | WorkType::PFactor => candidate(args)
            .with("sf", assignment.sieve_depth())
            .with("saved", assignment.tests_saved()),
        WorkType::PMinus1 => candidate(args)
            .with("B1", assignment.b1())
            .with_opt("B2", (assignment.b2() != 0).then_some(assignment.b2())),
        WorkType::Cert => args,
    }
}

impl Coordinator {
    /// Sends the hardware description and adopts the identity the server
    /// settles on. `keep_guid` re-sends the stored identifier instead of
    /// minting a new one.
    ///
    /// Registration is serialized across workers and never recurses: the
    /// calls made here hand identity errors back instead of re-registering.
    pub fn register(&self, keep_guid: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _guard = self.registration.lock().await;
            let state = self.state().snapshot().await;
            let guid = match state.guid.clone() {
                Some(guid) if keep_guid => guid,
                _ => new_guid(),
            };
            let hardware_guid = hardware_guid(self.config(), &state);
            let args = update_computer_args(self.config(), &guid, &hardware_guid);

            let response = self
                .transact(
                    Call::new(&UPDATE_COMPUTER_RETRY).recovery(Recovery::Report),
                    |_| args.clone(),
                )
                .await?
                .context("no usable reply while registering the computer")?;
            if !response.is_ok() {
                bail!("computer registration rejected: {}", response.code);
            }
            let reply = RegistrationReply::decode(&response.fields)
                .context("malformed computer registration reply")?;

            self.session().set_guid(reply.guid.clone());
            self.state()
                .update(|state| {
                    state.guid = Some(reply.guid.clone());
                    state.hardware_guid = Some(hardware_guid.clone());
                    state.user_id = Some(reply.user_id.clone());
                    state.computer_name = reply.computer_name.clone();
                    state.user_name = reply.user_name.clone();
                })
                .await?;
            tracing::info!(
                guid = %reply.guid,
                user = %reply.user_id,
                computer = reply.computer_name.as_deref().unwrap_or(""),
                cpu = %self.config().computer().cpu_brand,
                "computer registered"
            );

            self.exchange_program_options(true, Recovery::Report).await?;
            let stored = self.state().snapshot().await.options_counter.unwrap_or(0);
            if reply.options_counter > stored {
                self.exchange_program_options(false, Recovery::Report).await?;
            }
            Ok(())
        })
    }

    /// Registers unless a machine identifier is already stored.
    pub async fn ensure_registered(&self) -> Result<()> {
        match self.state().snapshot().await.guid {
            Some(guid) => {
                if self.session().guid().is_none() {
                    self.session().set_guid(guid);
                }
                Ok(())
            }
            None => self.register(false).await,
        }
    }

    /// `po`: exchanges program options and stores what the server sends back.
    pub async fn program_options(&self, first_time: bool) -> Result<()> {
        self.exchange_program_options(first_time, Recovery::Reregister)
            .await
    }

    async fn exchange_program_options(&self, first_time: bool, recovery: Recovery) -> Result<()> {
        let config = self.config();
        let response = self
            .transact(
                Call::new(&PROGRAM_OPTIONS_RETRY).recovery(recovery),
                |guid| program_options_args(config, guid, first_time),
            )
            .await?
            .context("no usable reply while exchanging program options")?;
        if !response.is_ok() {
            bail!("program options rejected: {}", response.code);
        }
        let reply = ProgramOptionsReply::decode(&response.fields)
            .context("malformed program options reply")?;

        if let Some(preference) = reply.work_preference {
            if !is_supported_preference(preference) {
                bail!(
                    "server work preference {preference} is not supported by {}",
                    config.engine().program_name()
                );
            }
        }

        self.state()
            .update(|state| {
                if reply.work_preference.is_some() {
                    state.work_preference = reply.work_preference;
                }
                if reply.worker_threads.is_some() {
                    state.worker_threads = reply.worker_threads;
                }
                if reply.days_of_work.is_some() {
                    state.days_of_work = reply.days_of_work;
                }
                if reply.memory_mib.is_some() {
                    state.memory_mib = reply.memory_mib;
                }
                state.options_counter = if first_time {
                    Some(state.options_counter.map_or(0, |counter| counter + 1))
                } else {
                    reply.options_counter.or(state.options_counter)
                };
            })
            .await?;
        tracing::debug!(?reply, first_time, "program options stored");
        Ok(())
    }

    /// `ra`: asks the server to key a locally created assignment. Returns
    /// the issued key, or `None` when the server declined.
    pub async fn register_assignment(&self, cpu: usize, assignment: &Assignment) -> Result<Option<String>> {
        let response = self
            .transact(
                Call::new(&REGISTER_ASSIGNMENT_RETRY).exponent(assignment.exponent()),
                |guid| register_assignment_args(guid, cpu, assignment),
            )
            .await?;
        let Some(response) = response else {
            return Ok(None);
        };
        if !response.is_ok() {
            tracing::error!(
                exponent = assignment.exponent(),
                code = response.code.code(),
                "server declined to register assignment: {}",
                response.code
            );
            return Ok(None);
        }
        let RegisteredKey { key } =
            RegisteredKey::decode(&response.fields).context("malformed register assignment reply")?;
        tracing::info!(exponent = assignment.exponent(), key = %key, "assignment registered");
        Ok(Some(key))
    }
}

/// Work preferences the agent knows how to run.
pub fn is_supported_preference(preference: u32) -> bool {
    matches!(preference, 100 | 101 | 102 | 104 | 150 | 151 | 152 | 153 | 154 | 4)
}
