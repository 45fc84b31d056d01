use crate::choice::{ChoiceIds, ChoiceTree};
use crate::emitter::Emitter;
use crate::fraction::FractionSupply;
use crate::state_space::StateSpaceRepository;
use std::cell::RefCell;
use std::sync::Arc;

/// Per-analysis session: owns the fraction supply, the choice arena, the log and the options.
/// One Ctx is used by one thread; only the state space repository is shared.
pub struct Ctx {
    pub(crate) spaces: Arc<StateSpaceRepository>,
    pub(crate) supply: FractionSupply,
    pub(crate) choices: ChoiceTree,
    pub(crate) log: RefCell<Emitter>,
    pub(crate) named_fractions: bool,
    pub(crate) pack_before_call: bool,
    pub(crate) debug: bool,
}

impl Ctx {
    pub fn new(spaces: Arc<StateSpaceRepository>) -> Ctx {
        Ctx {
            spaces,
            supply: FractionSupply::new(),
            choices: ChoiceTree::new(),
            log: RefCell::new(Emitter::new(None)),
            named_fractions: true,
            pack_before_call: true,
            debug: false,
        }
    }

    pub fn set_log(&mut self, writer: Option<Box<dyn std::io::Write>>) {
        self.log.borrow_mut().set_log(writer);
    }

    /// Named fractions for the permissions a method body starts with (default: true)
    pub fn set_named_fractions(&mut self, named: bool) {
        self.named_fractions = named;
    }

    /// Pack an unpacked receiver before handing it to a call (default: true)
    pub fn set_pack_before_call(&mut self, pack: bool) {
        self.pack_before_call = pack;
    }

    /// Also log whole contexts after each operation
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn spaces(&self) -> &Arc<StateSpaceRepository> {
        &self.spaces
    }

    pub fn supply(&self) -> &FractionSupply {
        &self.supply
    }

    pub fn choices(&self) -> &ChoiceTree {
        &self.choices
    }

    pub(crate) fn fresh_ids(&self, ids: ChoiceIds, purpose: &str) -> ChoiceIds {
        self.choices.fresh_ids(ids, purpose)
    }
}
