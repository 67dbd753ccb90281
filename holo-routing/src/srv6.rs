//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use holo_utils::UnboundedSender;
use holo_utils::ip::Ipv6NetworkExt;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{ForwardingError, ForwardingPlane, LocalSidMsg};
use holo_utils::srv6::Seg6LocalAction;
use ipnetwork::Ipv6Network;
use serde::Serialize;
use tracing::{error, warn};

use crate::debug::Debug;
use crate::error::{Error, with_source};

// Maximum number of collisions tolerated by the automatic SID allocator.
pub const SID_ALLOC_MAX_RETRIES: u32 = 100;

// Function index reserved for the locator's own End SID.
pub const LOCATOR_END_INDEX: u64 = 1;

// Valid range of function bit lengths.
pub const FUNCTION_BITS_RANGE: std::ops::RangeInclusive<u8> = 8..=64;

// SRv6 locator and SID registry.
pub struct Srv6Store {
    // Locators indexed by name.
    pub locators: BTreeMap<String, Locator>,
    // Source address used for SRv6 encapsulation.
    pub encap_src: Option<Ipv6Addr>,
    // Forwarding plane mirroring every local SID.
    dataplane: Box<dyn ForwardingPlane>,
    // Subscribed clients.
    clients: Vec<UnboundedSender<Srv6Notification>>,
}

#[derive(Debug)]
pub struct Locator {
    pub name: String,
    pub prefix: Ipv6Network,
    pub function_bits: u8,
    // Automatic allocation cursor.
    pub current: u64,
    pub chunks: Vec<LocatorChunk>,
    pub functions: BTreeMap<Ipv6Network, Function>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Serialize)]
pub struct LocatorChunk {
    pub prefix: Ipv6Network,
    pub owner: Option<Protocol>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Serialize)]
pub struct Function {
    pub prefix: Ipv6Network,
    pub locator: String,
    pub action: Seg6LocalAction,
    pub owner: Option<FunctionOwner>,
}

#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Serialize)]
pub struct FunctionOwner {
    pub protocol: Protocol,
    pub instance: String,
    pub request_key: u32,
}

// How a client asks for a SID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SidRequest {
    // Next free function index.
    Auto,
    // Fixed function index.
    Index(u64),
    // Explicit SID prefix. The all-zero prefix means automatic allocation.
    Prefix(Ipv6Network),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Serialize)]
pub struct LocatorInfo {
    pub name: String,
    pub prefix: Ipv6Network,
    pub function_bits: u8,
}

// Notifications sent to subscribed clients.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Serialize)]
pub enum Srv6Notification {
    LocatorAdd(LocatorInfo),
    LocatorDelete(LocatorInfo),
    FunctionAdd(Function),
    FunctionDelete(Function),
}

// ===== impl Srv6Store =====

impl Srv6Store {
    pub fn new(dataplane: Box<dyn ForwardingPlane>) -> Srv6Store {
        Srv6Store {
            locators: Default::default(),
            encap_src: None,
            dataplane,
            clients: Default::default(),
        }
    }

    // Registers a client and brings it up to date with the current set of
    // locators.
    pub fn subscribe(&mut self, tx: UnboundedSender<Srv6Notification>) {
        self.sync_client(&tx);
        self.clients.push(tx);
    }

    // Sends a locator-add notification for every locator to the given
    // client.
    pub fn sync_client(&self, tx: &UnboundedSender<Srv6Notification>) {
        for locator in self.locators.values() {
            let _ = tx.send(Srv6Notification::LocatorAdd(locator.info()));
        }
    }

    pub fn locator_add(
        &mut self,
        name: &str,
        prefix: Ipv6Network,
        function_bits: u8,
    ) -> Result<(), Error> {
        if self.locators.contains_key(name) {
            return Err(Error::LocatorExists(name.to_owned()));
        }
        if !FUNCTION_BITS_RANGE.contains(&function_bits)
            || prefix.prefix() as u16 + function_bits as u16
                > Ipv6Network::MAX_PREFIXLEN as u16
        {
            return Err(Error::InvalidFunctionBits(
                name.to_owned(),
                function_bits,
            ));
        }

        let prefix = prefix.apply_mask();
        let locator = Locator {
            name: name.to_owned(),
            prefix,
            function_bits,
            current: LOCATOR_END_INDEX,
            chunks: vec![LocatorChunk {
                prefix,
                owner: None,
            }],
            functions: Default::default(),
        };
        Debug::LocatorAdd(name, &prefix).log();
        self.notify(Srv6Notification::LocatorAdd(locator.info()));
        self.locators.insert(name.to_owned(), locator);

        // Install the locator's own End SID.
        if let Err(error) = self.function_add(
            name,
            SidRequest::Index(LOCATOR_END_INDEX),
            Seg6LocalAction::End,
            None,
        ) {
            error.log();
        }

        Ok(())
    }

    pub fn locator_lookup(&self, name: &str) -> Option<&Locator> {
        self.locators.get(name)
    }

    // Deletes a locator along with all of its functions. Clients are told
    // about every function going away before the locator itself.
    pub fn locator_delete(&mut self, name: &str) -> Result<(), Error> {
        let locator = self
            .locators
            .remove(name)
            .ok_or_else(|| Error::LocatorNotFound(name.to_owned()))?;

        for function in locator.functions.values() {
            self.function_uninstall(function);
            self.notify(Srv6Notification::FunctionDelete(function.clone()));
        }
        Debug::LocatorDelete(name).log();
        self.notify(Srv6Notification::LocatorDelete(locator.info()));

        Ok(())
    }

    pub fn chunk_assign(
        &mut self,
        owner: Protocol,
        name: &str,
    ) -> Result<LocatorChunk, Error> {
        // TODO: reply with a placeholder chunk that gets filled in once the
        // locator is configured.
        let locator = self
            .locators
            .get_mut(name)
            .ok_or_else(|| Error::LocatorNotFound(name.to_owned()))?;

        let chunk = locator
            .chunks
            .iter_mut()
            .find(|chunk| chunk.owner.is_none() || chunk.owner == Some(owner))
            .ok_or_else(|| Error::ChunkAlreadyOwned(name.to_owned(), owner))?;
        chunk.owner = Some(owner);
        Debug::ChunkAssign(name, owner).log();

        Ok(chunk.clone())
    }

    pub fn chunk_release(
        &mut self,
        owner: Protocol,
        name: &str,
    ) -> Result<(), Error> {
        let locator = self
            .locators
            .get_mut(name)
            .ok_or_else(|| Error::LocatorNotFound(name.to_owned()))?;

        for chunk in locator
            .chunks
            .iter_mut()
            .filter(|chunk| chunk.owner == Some(owner))
        {
            chunk.owner = None;
            Debug::ChunkRelease(name, owner).log();
        }

        Ok(())
    }

    // Releases every resource held by a protocol client.
    pub fn client_disconnect(&mut self, protocol: Protocol) {
        Debug::ClientDisconnect(protocol).log();

        let names = self.locators.keys().cloned().collect::<Vec<_>>();
        for name in names {
            let _ = self.chunk_release(protocol, &name);

            let Some(locator) = self.locators.get_mut(&name) else {
                continue;
            };
            let owned = locator
                .functions
                .values()
                .filter(|function| {
                    function
                        .owner
                        .as_ref()
                        .is_some_and(|owner| owner.protocol == protocol)
                })
                .map(|function| function.prefix)
                .collect::<Vec<_>>();
            let mut removed = vec![];
            for prefix in owned {
                if let Some(function) = locator.functions.remove(&prefix) {
                    removed.push(function);
                }
            }

            for function in removed {
                Debug::FunctionDelete(&name, &function.prefix).log();
                self.function_uninstall(&function);
                self.notify(Srv6Notification::FunctionDelete(function));
            }
        }
    }

    // Withdraws every locator and its SIDs from the forwarding plane.
    pub fn shutdown(&mut self) {
        let names = self.locators.keys().cloned().collect::<Vec<_>>();
        for name in names {
            let _ = self.locator_delete(&name);
        }
    }

    // Allocates a SID from the given locator and binds it to an endpoint
    // behavior. Nothing is recorded unless the forwarding plane accepted
    // the SID.
    pub fn function_add(
        &mut self,
        name: &str,
        request: SidRequest,
        action: Seg6LocalAction,
        owner: Option<FunctionOwner>,
    ) -> Result<Ipv6Network, Error> {
        if !action.is_supported() {
            return Err(Error::UnsupportedAction(action.action_type()));
        }

        let locator = self
            .locators
            .get_mut(name)
            .ok_or_else(|| Error::LocatorNotFound(name.to_owned()))?;
        let prefix = match request {
            SidRequest::Prefix(prefix) if prefix.ip().is_unspecified() => {
                locator.alloc_auto()?
            }
            SidRequest::Auto => locator.alloc_auto()?,
            SidRequest::Index(index) => locator.alloc_index(index)?,
            SidRequest::Prefix(prefix) => locator.alloc_prefix(prefix)?,
        };

        let function = Function {
            prefix,
            locator: name.to_owned(),
            action,
            owner,
        };
        self.dataplane
            .install_local_sid(&function.local_sid_msg())?;
        Debug::FunctionAdd(name, &prefix, &action).log();
        self.notify(Srv6Notification::FunctionAdd(function.clone()));
        if let Some(locator) = self.locators.get_mut(name) {
            locator.functions.insert(prefix, function);
        }

        Ok(prefix)
    }

    pub fn function_lookup(
        &self,
        name: &str,
        prefix: &Ipv6Network,
    ) -> Option<&Function> {
        self.locators
            .get(name)
            .and_then(|locator| locator.functions.get(prefix))
    }

    // Finds a function by its SID, regardless of the locator it belongs to.
    pub fn function_find(&self, sid: &Ipv6Addr) -> Option<&Function> {
        self.locators
            .values()
            .flat_map(|locator| locator.functions.values())
            .find(|function| function.prefix.ip() == *sid)
    }

    pub fn function_delete(
        &mut self,
        name: &str,
        prefix: &Ipv6Network,
    ) -> Result<Function, Error> {
        let locator = self
            .locators
            .get(name)
            .ok_or_else(|| Error::LocatorNotFound(name.to_owned()))?;
        let function = locator
            .functions
            .get(prefix)
            .ok_or(Error::FunctionNotFound(*prefix))?;

        remove_local_sid(self.dataplane.as_mut(), function)?;

        let function = self
            .locators
            .get_mut(name)
            .and_then(|locator| locator.functions.remove(prefix))
            .ok_or(Error::FunctionNotFound(*prefix))?;
        Debug::FunctionDelete(name, prefix).log();
        self.notify(Srv6Notification::FunctionDelete(function.clone()));

        Ok(function)
    }

    // Updates the SRv6 encapsulation source address.
    pub fn set_encap_src(&mut self, addr: Ipv6Addr) -> Result<(), Error> {
        self.dataplane.update_tunsrc(addr)?;
        Debug::EncapSrcUpdate(&addr).log();
        self.encap_src = Some(addr);
        Ok(())
    }

    // Gives direct access to the forwarding plane, for clients that install
    // SID bindings of their own.
    pub fn dataplane(&mut self) -> &mut dyn ForwardingPlane {
        self.dataplane.as_mut()
    }

    // Renders locators and installed SIDs as JSON.
    pub fn state(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct LocatorState<'a> {
            name: &'a str,
            prefix: String,
            function_bits: u8,
            chunks: &'a [LocatorChunk],
        }

        #[derive(Serialize)]
        struct SidState<'a> {
            sid: String,
            locator: &'a str,
            behavior: &'static str,
            context: String,
            owner: Option<&'a FunctionOwner>,
        }

        let locators = self
            .locators
            .values()
            .map(|locator| LocatorState {
                name: &locator.name,
                prefix: locator.prefix.to_string(),
                function_bits: locator.function_bits,
                chunks: &locator.chunks,
            })
            .collect::<Vec<_>>();
        let sids = self
            .locators
            .values()
            .flat_map(|locator| locator.functions.values())
            .map(|function| SidState {
                sid: function.prefix.to_string(),
                locator: &function.locator,
                behavior: function.action.action_type().name(),
                context: function.action.context(),
                owner: function.owner.as_ref(),
            })
            .collect::<Vec<_>>();

        serde_json::json!({
            "locators": locators,
            "sids": sids,
        })
    }

    fn function_uninstall(&mut self, function: &Function) {
        if let Err(error) =
            remove_local_sid(self.dataplane.as_mut(), function)
        {
            error!(
                prefix = %function.prefix,
                error = %with_source(&error),
                "failed to uninstall SID"
            );
        }
    }

    fn notify(&mut self, msg: Srv6Notification) {
        self.clients.retain(|tx| tx.send(msg.clone()).is_ok());
    }
}

impl std::fmt::Debug for Srv6Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Srv6Store")
            .field("locators", &self.locators)
            .field("encap_src", &self.encap_src)
            .finish()
    }
}

// ===== impl Locator =====

impl Locator {
    pub fn info(&self) -> LocatorInfo {
        LocatorInfo {
            name: self.name.clone(),
            prefix: self.prefix,
            function_bits: self.function_bits,
        }
    }

    // Length of the SIDs carved out of this locator.
    pub fn sid_len(&self) -> u8 {
        self.prefix.prefix() + self.function_bits
    }

    fn function_mask(&self) -> u64 {
        if self.function_bits >= 64 {
            u64::MAX
        } else {
            (1 << self.function_bits) - 1
        }
    }

    // Builds the SID prefix for the given function index.
    fn function_prefix(&self, index: u64) -> Ipv6Network {
        let shift = Ipv6Network::MAX_PREFIXLEN - self.sid_len();
        let base = u128::from(self.prefix.network());
        let addr = Ipv6Addr::from(base | ((index as u128) << shift));
        // The SID length never exceeds 128 bits.
        Ipv6Network::new(addr, self.sid_len()).unwrap_or(self.prefix)
    }

    fn alloc_auto(&mut self) -> Result<Ipv6Network, Error> {
        let mask = self.function_mask();
        let mut retries = 0;
        loop {
            self.current = self.current.wrapping_add(1);
            if self.current & !mask != 0 {
                self.current = 0;
            }

            let prefix = self.function_prefix(self.current);
            if !self.functions.contains_key(&prefix) {
                return Ok(prefix);
            }

            retries += 1;
            if retries > SID_ALLOC_MAX_RETRIES {
                warn!(locator = %self.name, "SID space exhausted");
                return Err(Error::AllocRetriesExhausted(self.name.clone()));
            }
        }
    }

    fn alloc_index(&self, index: u64) -> Result<Ipv6Network, Error> {
        if index & !self.function_mask() != 0 {
            return Err(Error::FunctionIndexOutOfRange(
                index,
                self.function_bits,
            ));
        }

        let prefix = self.function_prefix(index);
        if self.functions.contains_key(&prefix) {
            return Err(Error::FunctionExists(prefix));
        }
        Ok(prefix)
    }

    fn alloc_prefix(&self, prefix: Ipv6Network) -> Result<Ipv6Network, Error> {
        if prefix.prefix() != self.sid_len() {
            return Err(Error::FunctionPrefixLenMismatch(
                prefix,
                self.sid_len(),
            ));
        }
        if !self.prefix.contains_prefix(&prefix) {
            return Err(Error::FunctionPrefixOutOfRange(prefix, self.prefix));
        }

        let prefix = prefix.apply_mask();
        if self.functions.contains_key(&prefix) {
            return Err(Error::FunctionExists(prefix));
        }
        Ok(prefix)
    }
}

// ===== impl Function =====

impl Function {
    pub(crate) fn local_sid_msg(&self) -> LocalSidMsg {
        LocalSidMsg {
            protocol: self
                .owner
                .as_ref()
                .map(|owner| owner.protocol)
                .unwrap_or(Protocol::STATIC),
            sid: self.prefix,
            action: self.action,
        }
    }
}

// ===== helper functions =====

// Removes the route of a SID. The owning protocol may have withdrawn it
// already.
fn remove_local_sid(
    dataplane: &mut dyn ForwardingPlane,
    function: &Function,
) -> Result<(), ForwardingError> {
    match dataplane.remove_route(&function.local_sid_msg().key()) {
        Err(error) if error.is_not_found() => Ok(()),
        result => result,
    }
}
