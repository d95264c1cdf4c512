use tracing::{debug, warn};

use crate::common::entity::Family;
use crate::cthelper::entity::CtHelperRegistry;
use crate::ipset::entity::IpsetRegistry;
use crate::redirect::entity::Redirect;
use crate::redirect::error::RedirectError;
use crate::redirect::expand::expand;
use crate::redirect::validate::{select_helper, validate};
use crate::rule::entity::{RuleSink, Table};
use crate::zone::entity::ZoneRegistry;

/// Global policy switches.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    /// Pick conntrack helpers from the rewrite port when a record does
    /// not name one.
    pub auto_helper: bool,
    /// Reject any record referencing an ipset.
    pub disable_ipsets: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            auto_helper: true,
            disable_ipsets: false,
        }
    }
}

/// The whole policy under compilation: registries of named objects and
/// the redirect records that survived validation.
#[derive(Debug, Default, Clone)]
pub struct PolicyState {
    pub defaults: Defaults,
    pub zones: ZoneRegistry,
    pub ipsets: IpsetRegistry,
    pub helpers: CtHelperRegistry,
    redirects: Vec<Redirect>,
}

impl PolicyState {
    pub fn new(defaults: Defaults) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Validate and admit one record. Invalid records are logged and
    /// dropped; the policy stays usable.
    pub fn add_redirect(&mut self, mut redir: Redirect) {
        match validate(&mut redir, self) {
            Ok(()) => {
                select_helper(&mut redir, self);
                self.redirects.push(redir);
            }
            Err(RedirectError::Disabled) => {
                debug!(redirect = %redir.label(), "skipping disabled redirect");
            }
            Err(err) => {
                warn!(redirect = %redir.label(), %err, "dropping invalid redirect");
            }
        }
    }

    pub fn redirects(&self) -> &[Redirect] {
        &self.redirects
    }

    /// Compile every admitted record for one table into `sink`.
    /// Repeated calls yield identical output for the same policy.
    pub fn compile(&mut self, table: Table, family: Family, sink: &mut dyn RuleSink) {
        if family == Family::V6 {
            return;
        }

        let PolicyState {
            zones,
            ipsets,
            helpers,
            redirects,
            ..
        } = self;

        for redir in redirects.iter() {
            if table == Table::Raw && !redir.helper.is_resolved() {
                continue;
            }
            expand(redir, table, family, zones, ipsets, helpers, sink);
        }
    }
}
