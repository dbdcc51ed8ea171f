use super::{
    app_instance::AppInstance, free_balance::FreeBalanceState, proposal::AppInstanceProposal,
    PartID, TokenIndexedBalances, PARTICIPANTS,
};
use crate::{
    abiencode::{keccak256_packed, Packed},
    apps::AppState,
    config::NetworkContext,
    error::ValidationError,
    sig::PublicIdentifier,
    Address, Hash,
};

/// A two-party state channel.
///
/// Values are never mutated in place: every transition returns a new
/// [StateChannel], the old one stays valid until the new one is persisted.
/// Apps reference the channel by multisig address, the channel owns its apps
/// and looks them up by identity hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChannel {
    pub(super) multisig_address: Address,
    pub(super) user_identifiers: [PublicIdentifier; PARTICIPANTS],
    pub(super) num_proposed_apps: u64,
    pub(super) app_instances: Vec<AppInstance>,
    pub(super) proposed_app_instances: Vec<AppInstanceProposal>,
    pub(super) free_balance: AppInstance,
}

/// CREATE2 style address of the multisig owned by `owners`. The owners are
/// sorted first, so both parties derive the same address no matter who
/// initiates.
pub fn derive_multisig_address(
    network: &NetworkContext,
    owners: [PublicIdentifier; PARTICIPANTS],
) -> Address {
    let mut addrs = owners.map(|o| o.signer_address());
    addrs.sort();
    let salt = keccak256_packed(&[Packed::AddressArray(&addrs)]);
    let code_hash = keccak256_packed(&[Packed::Address(network.minimum_viable_multisig)]);
    let hash = keccak256_packed(&[
        Packed::Uint8(0xff),
        Packed::Address(network.proxy_factory),
        Packed::Bytes32(salt),
        Packed::Bytes32(code_hash),
    ]);
    let mut addr = Address::zero();
    addr.0.copy_from_slice(&hash.0[32 - 20..]);
    addr
}

impl StateChannel {
    /// A fresh channel: no apps, an empty free balance at version 0 and the
    /// app counter at 1 (nonce 0 belongs to the free balance).
    pub fn setup(
        multisig_address: Address,
        user_identifiers: [PublicIdentifier; PARTICIPANTS],
        identity_app: Address,
    ) -> Self {
        let participants = user_identifiers.map(|id| id.signer_address());
        Self {
            multisig_address,
            user_identifiers,
            num_proposed_apps: 1,
            app_instances: Vec::new(),
            proposed_app_instances: Vec::new(),
            free_balance: AppInstance::free_balance(multisig_address, participants, identity_app),
        }
    }

    pub fn multisig_address(&self) -> Address {
        self.multisig_address
    }

    pub fn user_identifiers(&self) -> &[PublicIdentifier; PARTICIPANTS] {
        &self.user_identifiers
    }

    /// Signer addresses, in channel order.
    pub fn participants(&self) -> [Address; PARTICIPANTS] {
        self.user_identifiers.map(|id| id.signer_address())
    }

    pub fn part_id(&self, addr: &Address) -> Option<PartID> {
        self.participants().iter().position(|p| p == addr)
    }

    /// The other participant, if `me` is one of them.
    pub fn counterparty_of(&self, me: &PublicIdentifier) -> Option<PublicIdentifier> {
        match self.user_identifiers {
            [a, b] if a == *me => Some(b),
            [a, b] if b == *me => Some(a),
            _ => None,
        }
    }

    pub fn num_proposed_apps(&self) -> u64 {
        self.num_proposed_apps
    }

    pub fn app_instances(&self) -> &[AppInstance] {
        &self.app_instances
    }

    pub fn proposed_app_instances(&self) -> &[AppInstanceProposal] {
        &self.proposed_app_instances
    }

    pub fn free_balance(&self) -> &AppInstance {
        &self.free_balance
    }

    pub fn free_balance_state(&self) -> &FreeBalanceState {
        match self.free_balance.latest_state() {
            AppState::FreeBalance(fb) => fb,
            // The constructors and the JSON import only ever build channels
            // with a free balance state here.
            _ => unreachable!("free balance app holds a non free balance state"),
        }
    }

    pub fn free_balance_version(&self) -> u64 {
        self.free_balance.latest_version()
    }

    pub fn is_free_balance(&self, identity_hash: &Hash) -> bool {
        self.free_balance.identity_hash() == *identity_hash
    }

    pub fn get_app_instance(&self, identity_hash: &Hash) -> Result<&AppInstance, ValidationError> {
        if self.is_free_balance(identity_hash) {
            return Ok(&self.free_balance);
        }
        self.app_instances
            .iter()
            .find(|app| app.identity_hash() == *identity_hash)
            .ok_or(ValidationError::NoApp(*identity_hash))
    }

    pub fn has_app_instance(&self, identity_hash: &Hash) -> bool {
        self.app_instances
            .iter()
            .any(|app| app.identity_hash() == *identity_hash)
    }

    pub fn get_proposal(&self, identity_hash: &Hash) -> Result<&AppInstanceProposal, ValidationError> {
        self.proposed_app_instances
            .iter()
            .find(|p| p.identity_hash == *identity_hash)
            .ok_or(ValidationError::NoProposal(*identity_hash))
    }

    pub fn has_proposal(&self, identity_hash: &Hash) -> bool {
        self.get_proposal(identity_hash).is_ok()
    }

    pub fn add_proposal(&self, proposal: AppInstanceProposal) -> Result<Self, ValidationError> {
        if self.has_proposal(&proposal.identity_hash) || self.has_app_instance(&proposal.identity_hash)
        {
            return Err(ValidationError::App(format!(
                "app {} was already proposed",
                proposal.identity_hash
            )));
        }
        let mut next = self.clone();
        next.num_proposed_apps = next.num_proposed_apps.max(proposal.app_nonce() + 1);
        next.proposed_app_instances.push(proposal);
        Ok(next)
    }

    pub fn remove_proposal(&self, identity_hash: &Hash) -> Result<Self, ValidationError> {
        self.get_proposal(identity_hash)?;
        let mut next = self.clone();
        next.proposed_app_instances
            .retain(|p| p.identity_hash != *identity_hash);
        Ok(next)
    }

    /// Turn a stored proposal into an installed app at version 0, moving both
    /// deposits out of the free balance.
    pub fn install_app(&self, identity_hash: &Hash) -> Result<Self, ValidationError> {
        let proposal = self.get_proposal(identity_hash)?;

        let mut fb = self.free_balance_state().clone();
        for (owner, amount, asset) in proposal.deposits.entries() {
            fb.debit(asset, owner, amount)?;
        }
        fb.activate(*identity_hash);

        let app = proposal.to_app_instance();
        let mut next = self.remove_proposal(identity_hash)?;
        next.app_instances.push(app);
        next.free_balance = next.free_balance.with_state(
            AppState::FreeBalance(fb),
            self.free_balance_version() + 1,
        );
        Ok(next)
    }

    /// Replace the state of an installed (non free balance) app.
    pub fn set_app_state(
        &self,
        identity_hash: &Hash,
        state: AppState,
        version: u64,
    ) -> Result<Self, ValidationError> {
        if self.is_free_balance(identity_hash) {
            return Err(ValidationError::FreeBalanceNotModifiable);
        }
        let mut next = self.clone();
        let app = next
            .app_instances
            .iter_mut()
            .find(|app| app.identity_hash() == *identity_hash)
            .ok_or(ValidationError::NoApp(*identity_hash))?;
        *app = app.with_state(state, version);
        Ok(next)
    }

    /// Remove an installed app and credit its resolved outcome to the free
    /// balance.
    pub fn uninstall_app(
        &self,
        identity_hash: &Hash,
        increments: &TokenIndexedBalances,
    ) -> Result<Self, ValidationError> {
        if self.is_free_balance(identity_hash) {
            return Err(ValidationError::FreeBalanceNotModifiable);
        }
        self.get_app_instance(identity_hash)?;

        let mut fb = self.free_balance_state().clone();
        fb.deactivate(identity_hash);
        fb.apply_increments(increments)?;

        let mut next = self.clone();
        next.app_instances
            .retain(|app| app.identity_hash() != *identity_hash);
        next.free_balance = next.free_balance.with_state(
            AppState::FreeBalance(fb),
            self.free_balance_version() + 1,
        );
        Ok(next)
    }

    /// Replace the free balance app and the installed apps wholesale. Only
    /// used when adopting a newer, verified free balance during a sync.
    pub(crate) fn with_free_balance(&self, free_balance: AppInstance, apps: Vec<AppInstance>) -> Self {
        Self {
            free_balance,
            app_instances: apps,
            ..self.clone()
        }
    }

    pub(crate) fn with_proposals(&self, proposals: Vec<AppInstanceProposal>, num_proposed_apps: u64) -> Self {
        Self {
            proposed_app_instances: proposals,
            num_proposed_apps,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{proposal, two_identifiers};
    use crate::U256;

    fn funded_channel() -> StateChannel {
        let ids = two_identifiers();
        let channel = StateChannel::setup(Address([0xaa; 20]), ids, Address([0xee; 20]));
        let mut fb = channel.free_balance_state().clone();
        for p in channel.participants() {
            fb.credit(Address::zero(), p, U256::from(10u64)).unwrap();
        }
        let free_balance = channel
            .free_balance()
            .with_state(AppState::FreeBalance(fb), 0);
        channel.with_free_balance(free_balance, Vec::new())
    }

    #[test]
    fn setup_starts_counter_at_one() {
        let channel = funded_channel();
        assert_eq!(channel.num_proposed_apps(), 1);
        assert_eq!(channel.free_balance_version(), 0);
        assert_eq!(channel.free_balance().identity().channel_nonce, 0);
    }

    #[test]
    fn proposal_advances_counter_without_touching_the_original() {
        let channel = funded_channel();
        let p = proposal(&channel, 3, 4);
        let next = channel.add_proposal(p.clone()).unwrap();

        assert_eq!(next.num_proposed_apps(), 2);
        assert!(next.has_proposal(&p.identity_hash));
        assert_eq!(channel.num_proposed_apps(), 1);
        assert!(!channel.has_proposal(&p.identity_hash));
        assert!(next.add_proposal(p).is_err());
    }

    #[test]
    fn install_moves_deposits_out_of_the_free_balance() {
        let channel = funded_channel();
        let p = proposal(&channel, 3, 4);
        let hash = p.identity_hash;
        let installed = channel.add_proposal(p).unwrap().install_app(&hash).unwrap();

        let [a, b] = channel.participants();
        let fb = installed.free_balance_state();
        assert_eq!(fb.balance(&Address::zero(), &a), U256::from(7u64));
        assert_eq!(fb.balance(&Address::zero(), &b), U256::from(6u64));
        assert!(fb.is_active(&hash));
        assert_eq!(installed.free_balance_version(), 1);
        assert_eq!(installed.get_app_instance(&hash).unwrap().latest_version(), 0);
        assert!(!installed.has_proposal(&hash));
    }

    #[test]
    fn install_without_funds_fails() {
        let channel = funded_channel();
        let p = proposal(&channel, 11, 0);
        let hash = p.identity_hash;
        let err = channel
            .add_proposal(p)
            .unwrap()
            .install_app(&hash)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientFreeBalance { .. }));
    }

    #[test]
    fn uninstall_credits_increments_once() {
        let channel = funded_channel();
        let p = proposal(&channel, 3, 4);
        let hash = p.identity_hash;
        let installed = channel.add_proposal(p).unwrap().install_app(&hash).unwrap();

        let [a, _] = channel.participants();
        let mut inc = TokenIndexedBalances::new();
        inc.entry(Address::zero()).or_default().insert(a, U256::from(7u64));
        let done = installed.uninstall_app(&hash, &inc).unwrap();

        assert!(!done.has_app_instance(&hash));
        assert!(!done.free_balance_state().is_active(&hash));
        assert_eq!(done.free_balance_state().balance(&Address::zero(), &a), U256::from(14u64));
        assert_eq!(done.free_balance_version(), 2);
        assert!(matches!(
            done.uninstall_app(&hash, &inc),
            Err(ValidationError::NoApp(_))
        ));
    }

    #[test]
    fn free_balance_is_not_modifiable() {
        let channel = funded_channel();
        let fb_hash = channel.free_balance().identity_hash();
        assert_eq!(
            channel.uninstall_app(&fb_hash, &TokenIndexedBalances::new()),
            Err(ValidationError::FreeBalanceNotModifiable)
        );
        assert_eq!(
            channel.set_app_state(&fb_hash, channel.free_balance().latest_state().clone(), 1),
            Err(ValidationError::FreeBalanceNotModifiable)
        );
    }

    #[test]
    fn multisig_address_does_not_depend_on_order() {
        let [a, b] = two_identifiers();
        let network = NetworkContext::default();
        assert_eq!(
            derive_multisig_address(&network, [a, b]),
            derive_multisig_address(&network, [b, a])
        );
    }
}
