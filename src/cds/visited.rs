/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::runtime::value::ObjectRef;
use std::collections::HashSet;

/// Objects reached during the current recording session. Exists only
/// between `start` and `stop`; cross-session dedup is the identity cache's
/// job.
#[derive(Default)]
pub struct SeenObjects {
    set: Option<HashSet<ObjectRef>>,
}

impl SeenObjects {
    pub fn start(&mut self) {
        assert!(self.set.is_none(), "recording sessions must not overlap");
        self.set = Some(HashSet::new());
    }

    pub fn stop(&mut self) {
        assert!(self.set.is_some(), "no recording session is active");
        self.set = None;
    }

    pub fn is_active(&self) -> bool {
        self.set.is_some()
    }

    pub fn has_been_seen(&self, object: ObjectRef) -> bool {
        self.set
            .as_ref()
            .map_or(false, |set| set.contains(&object))
    }

    pub fn set_has_been_seen(&mut self, object: ObjectRef) {
        let set = self
            .set
            .as_mut()
            .unwrap_or_else(|| panic!("no recording session is active"));
        let inserted = set.insert(object);
        debug_assert!(inserted, "object seen twice in one session");
    }

    pub fn len(&self) -> usize {
        self.set.as_ref().map_or(0, HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
