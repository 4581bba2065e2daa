mod account;
mod fork;
mod substate;

pub use account::{CodeResolver, SubstateAccount, SubstateDecodeError};
pub use fork::HardFork;
pub use substate::{
    Log, STATUS_FAILED, STATUS_SUCCESS, Substate, SubstateAlloc, SubstateEnv, SubstateMessage,
    SubstateResult, bloom_from_logs, create_address,
};
