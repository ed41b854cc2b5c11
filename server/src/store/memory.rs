use super::{LockMode, StoreError, StoreGateway, StoreTransaction};
use netbird_peer_types::{
    Account, AccountId, AccountSettings, Group, GroupId, Location, Network, NetworkRouter, Peer,
    PeerId, PeerStatus, Policy, SetupKey, SetupKeyId, UserId, ALL_GROUP_NAME,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Clone, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    peers: HashMap<PeerId, Peer>,
    peers_by_pubkey: HashMap<String, PeerId>,
    groups: HashMap<GroupId, Group>,
    all_group_of: HashMap<AccountId, GroupId>,
    policies: HashMap<netbird_peer_types::PolicyId, Policy>,
    routers: HashMap<netbird_peer_types::RouteId, NetworkRouter>,
    setup_keys: HashMap<SetupKeyId, SetupKey>,
    user_last_login: HashMap<UserId, SystemTime>,
}

/// The reference `StoreGateway` implementation: every table is a plain
/// `HashMap` behind one `parking_lot::Mutex`, the same small-synchronous-
/// critical-section pattern the reference server uses for its
/// `Arc<Mutex<Connection>>`. A "transaction" clones the tables, runs the
/// closure against the clone, and swaps it back in only on success --
/// giving real rollback-on-error semantics without a WAL.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account(&self, account: Account) {
        self.tables.lock().accounts.insert(account.id.clone(), account);
    }

    pub fn seed_setup_key(&self, key: SetupKey) {
        self.tables.lock().setup_keys.insert(key.id.clone(), key);
    }

    pub fn seed_group(&self, group: Group) {
        self.tables.lock().groups.insert(group.id.clone(), group);
    }

    pub fn seed_policy(&self, policy: Policy) {
        self.tables.lock().policies.insert(policy.id.clone(), policy);
    }

    pub fn seed_router(&self, router: NetworkRouter) {
        self.tables.lock().routers.insert(router.id.clone(), router);
    }

    pub fn seed_peer(&self, peer: Peer) {
        let mut tables = self.tables.lock();
        tables.peers_by_pubkey.insert(peer.wireguard_public_key.clone(), peer.id.clone());
        tables.peers.insert(peer.id.clone(), peer);
    }
}

fn all_group_id(tables: &mut Tables, account_id: &AccountId) -> GroupId {
    if let Some(id) = tables.all_group_of.get(account_id) {
        return id.clone();
    }
    let group = Group::new(GroupId::generate(), account_id.clone(), ALL_GROUP_NAME);
    let id = group.id.clone();
    tables.all_group_of.insert(account_id.clone(), id.clone());
    tables.groups.insert(id.clone(), group);
    id
}

struct MemoryTransaction<'a> {
    tables: &'a mut Tables,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn get_peer_by_id(&self, peer_id: &PeerId, _lock: LockMode) -> Result<Peer, StoreError> {
        self.tables.peers.get(peer_id).cloned().ok_or(StoreError::NotFound)
    }

    fn get_setup_key_by_id(&self, key_id: &SetupKeyId, _lock: LockMode) -> Result<SetupKey, StoreError> {
        self.tables.setup_keys.get(key_id).cloned().ok_or(StoreError::NotFound)
    }

    fn get_peer_group_ids(&self, peer_id: &PeerId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self
            .tables
            .groups
            .values()
            .filter(|g| g.peers.contains(peer_id))
            .map(|g| g.id.clone())
            .collect())
    }

    fn save_peer(&mut self, peer: Peer) -> Result<(), StoreError> {
        if !self.tables.peers.contains_key(&peer.id) {
            return Err(StoreError::NotFound);
        }
        self.tables.peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    fn save_peer_status(&mut self, peer_id: &PeerId, status: PeerStatus) -> Result<(), StoreError> {
        let peer = self.tables.peers.get_mut(peer_id).ok_or(StoreError::NotFound)?;
        peer.status = status;
        Ok(())
    }

    fn save_peer_location(&mut self, peer_id: &PeerId, location: Location) -> Result<(), StoreError> {
        let peer = self.tables.peers.get_mut(peer_id).ok_or(StoreError::NotFound)?;
        peer.location = location;
        Ok(())
    }

    fn add_peer_to_account(&mut self, peer: Peer) -> Result<(), StoreError> {
        if self.tables.peers_by_pubkey.contains_key(&peer.wireguard_public_key) {
            return Err(StoreError::UniqueConstraint);
        }
        let collides = self.tables.peers.values().any(|existing| {
            existing.account_id == peer.account_id
                && (existing.ip == peer.ip || existing.dns_label == peer.dns_label)
        });
        if collides {
            return Err(StoreError::UniqueConstraint);
        }
        self.tables
            .peers_by_pubkey
            .insert(peer.wireguard_public_key.clone(), peer.id.clone());
        self.tables.peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    fn add_peer_to_group(&mut self, group_id: &GroupId, peer_id: &PeerId) -> Result<(), StoreError> {
        let group = self.tables.groups.get_mut(group_id).ok_or(StoreError::NotFound)?;
        group.peers.insert(peer_id.clone());
        Ok(())
    }

    fn add_peer_to_all_group(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError> {
        let group_id = all_group_id(self.tables, account_id);
        self.tables.groups.get_mut(&group_id).expect("just created").peers.insert(peer_id.clone());
        Ok(())
    }

    fn remove_peer_from_all_groups(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError> {
        for group in self.tables.groups.values_mut() {
            if &group.account_id == account_id {
                group.peers.remove(peer_id);
            }
        }
        Ok(())
    }

    fn delete_peer(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError> {
        let peer = self.tables.peers.get(peer_id).ok_or(StoreError::NotFound)?;
        if &peer.account_id != account_id {
            return Err(StoreError::NotFound);
        }
        let pubkey = peer.wireguard_public_key.clone();
        self.tables.peers_by_pubkey.remove(&pubkey);
        self.tables.peers.remove(peer_id);
        Ok(())
    }

    fn increment_setup_key_usage(&mut self, key_id: &SetupKeyId) -> Result<(), StoreError> {
        let key = self.tables.setup_keys.get_mut(key_id).ok_or(StoreError::NotFound)?;
        key.used_times += 1;
        Ok(())
    }

    fn increment_network_serial(&mut self, account_id: &AccountId) -> Result<u64, StoreError> {
        let account = self.tables.accounts.get_mut(account_id).ok_or(StoreError::NotFound)?;
        account.network.serial += 1;
        Ok(account.network.serial)
    }

    fn save_user_last_login(&mut self, user_id: &UserId, at: SystemTime) -> Result<(), StoreError> {
        self.tables.user_last_login.insert(user_id.clone(), at);
        Ok(())
    }
}

impl StoreGateway for MemoryStore {
    async fn get_peer_by_id(&self, peer_id: &PeerId, _lock: LockMode) -> Result<Peer, StoreError> {
        self.tables.lock().peers.get(peer_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_peer_by_pubkey(&self, public_key: &str) -> Result<Peer, StoreError> {
        let tables = self.tables.lock();
        let id = tables.peers_by_pubkey.get(public_key).ok_or(StoreError::NotFound)?;
        tables.peers.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_account_id_by_peer_pubkey(&self, public_key: &str) -> Result<AccountId, StoreError> {
        let tables = self.tables.lock();
        let id = tables.peers_by_pubkey.get(public_key).ok_or(StoreError::NotFound)?;
        Ok(tables.peers.get(id).ok_or(StoreError::NotFound)?.account_id.clone())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Account, StoreError> {
        self.tables.lock().accounts.get(account_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_account_peers(&self, account_id: &AccountId) -> Result<Vec<Peer>, StoreError> {
        Ok(self
            .tables
            .lock()
            .peers
            .values()
            .filter(|p| &p.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_account_settings(&self, account_id: &AccountId) -> Result<AccountSettings, StoreError> {
        Ok(self
            .tables
            .lock()
            .accounts
            .get(account_id)
            .ok_or(StoreError::NotFound)?
            .settings
            .clone())
    }

    async fn get_account_network(&self, account_id: &AccountId) -> Result<Network, StoreError> {
        Ok(self
            .tables
            .lock()
            .accounts
            .get(account_id)
            .ok_or(StoreError::NotFound)?
            .network
            .clone())
    }

    async fn get_setup_key_by_secret(&self, hashed_secret: &str) -> Result<SetupKey, StoreError> {
        self.tables
            .lock()
            .setup_keys
            .values()
            .find(|k| k.hashed_secret == hashed_secret)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_groups_by_ids(&self, account_id: &AccountId, ids: &[GroupId]) -> Result<Vec<Group>, StoreError> {
        let tables = self.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.groups.get(id))
            .filter(|g| &g.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_account_groups(&self, account_id: &AccountId) -> Result<Vec<Group>, StoreError> {
        Ok(self
            .tables
            .lock()
            .groups
            .values()
            .filter(|g| &g.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_account_policies(&self, account_id: &AccountId) -> Result<Vec<Policy>, StoreError> {
        Ok(self
            .tables
            .lock()
            .policies
            .values()
            .filter(|p| &p.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_network_routers_by_account_id(&self, account_id: &AccountId) -> Result<Vec<NetworkRouter>, StoreError> {
        Ok(self
            .tables
            .lock()
            .routers
            .values()
            .filter(|r| &r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_account_peers_with_expiration(&self, account_id: &AccountId) -> Result<Vec<Peer>, StoreError> {
        Ok(self
            .tables
            .lock()
            .peers
            .values()
            .filter(|p| &p.account_id == account_id && p.login_expiration_enabled && p.status.connected)
            .cloned()
            .collect())
    }

    async fn get_account_peers_with_inactivity(&self, account_id: &AccountId) -> Result<Vec<Peer>, StoreError> {
        Ok(self
            .tables
            .lock()
            .peers
            .values()
            .filter(|p| &p.account_id == account_id && p.inactivity_expiration_enabled && !p.status.connected)
            .cloned()
            .collect())
    }

    async fn get_peer_group_ids(&self, peer_id: &PeerId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self
            .tables
            .lock()
            .groups
            .values()
            .filter(|g| g.peers.contains(peer_id))
            .map(|g| g.id.clone())
            .collect())
    }

    async fn ip_in_use(&self, account_id: &AccountId, ip: Ipv4Addr) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .peers
            .values()
            .any(|p| &p.account_id == account_id && p.ip == ip))
    }

    async fn dns_label_in_use(&self, account_id: &AccountId, label: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .peers
            .values()
            .any(|p| &p.account_id == account_id && p.dns_label == label))
    }

    async fn execute_in_transaction<F, T>(&self, _account_id: &AccountId, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let mut working_copy = self.tables.lock().clone();
        let mut tx = MemoryTransaction { tables: &mut working_copy };
        let result = f(&mut tx)?;
        *self.tables.lock() = working_copy;
        Ok(result)
    }
}
