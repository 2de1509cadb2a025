use crate::cache::{self, Cache, Line};
use crate::cache_sys::CacheSys;
use crate::coherence::{Action, State};
use crate::core::Core;
use crate::mshr;
use crate::replacement::ReplacementPolicy as _;
use crate::request::{Kind, Op, Request, RequestStatus};
use crate::{address, config};
use console::style;

/// Arena index of one cache: the owning hierarchy and the position inside
/// its level vector.
///
/// Every up/down/peer edge in the topology is one of these, resolved on
/// demand, so an edge can never dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheRef {
    pub sys: usize,
    pub idx: usize,
}

/// The whole machine: every core with its two hierarchies, driven in a
/// deterministic round per cycle.
///
/// All mutation flows through `&mut self`; the model is a simulator *of*
/// parallelism, not a parallel simulator.
#[derive(Debug)]
pub struct Simulator {
    pub sys: Vec<CacheSys>,
    pub cores: Vec<Core>,
    memory_latency: u64,
    finalized: bool,
}

impl Simulator {
    #[must_use]
    pub fn new(config: config::Hierarchy) -> Self {
        Self {
            sys: Vec::new(),
            cores: Vec::new(),
            memory_latency: config.memory_latency,
            finalized: false,
        }
    }

    /// Add a core with an (empty) data hierarchy and translation hierarchy.
    pub fn add_core(&mut self, config: &config::Core) -> usize {
        let core_id = self.cores.len();
        let data_sys = self.sys.len();
        let tlb_sys = data_sys + 1;
        self.sys
            .push(CacheSys::new(data_sys, core_id, false, self.memory_latency));
        self.sys
            .push(CacheSys::new(tlb_sys, core_id, true, self.memory_latency));
        self.cores.push(Core::new(core_id, data_sys, tlb_sys, config));
        core_id
    }

    pub fn add_data_cache(
        &mut self,
        core: usize,
        config: config::Cache,
    ) -> Result<CacheRef, config::Error> {
        config.validate()?;
        let sys = self
            .cores
            .get(core)
            .ok_or(config::Error::NoSuchCore { core })?
            .data_sys;
        let cache = Cache::new(&config, core);
        let idx = self.sys[sys].add_cache_to_hier(cache)?;
        Ok(CacheRef { sys, idx })
    }

    pub fn add_tlb(
        &mut self,
        core: usize,
        config: config::Cache,
    ) -> Result<CacheRef, config::Error> {
        config.validate()?;
        let sys = self
            .cores
            .get(core)
            .ok_or(config::Error::NoSuchCore { core })?
            .tlb_sys;
        let cache = Cache::new(&config, core);
        let idx = self.sys[sys].add_cache_to_hier(cache)?;
        Ok(CacheRef { sys, idx })
    }

    /// Validate the topology and wire the cross-hierarchy edges: the
    /// translation chains, the translation↔data boundary, and the peer
    /// lists used for coherence broadcast.
    pub fn finalize(&mut self) -> Result<(), config::Error> {
        for core_id in 0..self.cores.len() {
            let data_id = self.cores[core_id].data_sys;
            let tlb_id = self.cores[core_id].tlb_sys;

            if self.sys[data_id].caches.is_empty() {
                return Err(config::Error::EmptyHierarchy {
                    core: core_id,
                    hier: "data",
                });
            }
            let tlb_len = self.sys[tlb_id].caches.len();
            if tlb_len % 2 != 0 {
                return Err(config::Error::UnpairedTlbLevel {
                    core: core_id,
                    len: tlb_len,
                });
            }

            let last = self.sys[tlb_id].last_level();
            if last >= 2 {
                let llc_idx = self.sys[data_id].caches.len() - 1;
                let llc = CacheRef {
                    sys: data_id,
                    idx: llc_idx,
                };
                // each size chain releases upward level by level, except the
                // last level, which releases through the data boundary
                for idx in 2..tlb_len {
                    if self.sys[tlb_id].caches[idx].level == last {
                        continue;
                    }
                    let above = CacheRef {
                        sys: tlb_id,
                        idx: idx - 2,
                    };
                    self.sys[tlb_id].caches[idx].higher.push(above);
                }
                for idx in [2 * last - 2, 2 * last - 1] {
                    self.sys[tlb_id].caches[idx].higher.push(llc);
                }
                // the TLB level that descends into the data hierarchy sits
                // above its last-level cache
                for idx in [2 * last - 4, 2 * last - 3] {
                    let above = CacheRef { sys: tlb_id, idx };
                    self.sys[data_id].caches[llc_idx].higher.push(above);
                }
            }
        }

        // every hierarchy broadcasts to every hierarchy of every other core
        for i in 0..self.sys.len() {
            for j in 0..self.sys.len() {
                if self.sys[i].core_id != self.sys[j].core_id {
                    let peer = self.sys[j].id;
                    self.sys[i].add_cachesys(peer);
                }
            }
        }

        self.finalized = true;
        Ok(())
    }

    #[must_use]
    pub fn cache(&self, r: CacheRef) -> &Cache {
        &self.sys[r.sys].caches[r.idx]
    }

    #[must_use]
    pub fn cache_mut(&mut self, r: CacheRef) -> &mut Cache {
        &mut self.sys[r.sys].caches[r.idx]
    }

    #[must_use]
    pub fn core(&self, id: usize) -> &Core {
        &self.cores[id]
    }

    /// The simulator's cycle counter.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.sys.first().map_or(0, |sys| sys.clk)
    }

    /// Inject a transaction at the top of the appropriate hierarchy.
    pub fn access(
        &mut self,
        core: usize,
        addr: address,
        kind: Kind,
        tid: u64,
        is_large: bool,
    ) -> RequestStatus {
        debug_assert!(self.finalized, "wire the topology before injecting accesses");
        let (sys, idx) = if kind.is_translation() {
            (self.cores[core].tlb_sys, usize::from(is_large))
        } else {
            (self.cores[core].data_sys, 0)
        };
        let entry = CacheRef { sys, idx };
        let latency = self.cache(entry).latency;
        self.lookup_and_fill(entry, addr, kind, tid, is_large, latency)
    }

    /// One cycle: every hierarchy ticks, in arena order.
    pub fn tick(&mut self) {
        for id in 0..self.sys.len() {
            self.tick_sys(id);
        }
    }

    /// Advance one hierarchy by a cycle: drain the coherence actions peers
    /// queued last cycle, advance the clock, retire due hits, then retire
    /// due memory replies (which releases MSHR locks up the tree).
    pub fn tick_sys(&mut self, id: usize) {
        let pending = self.sys[id].take_coherence_queue();
        if !pending.is_empty() {
            log::debug!(
                "cache_sys[{}]::tick(clk={}) draining {} coherence actions",
                id,
                self.sys[id].clk,
                style(pending.len()).blue(),
            );
        }
        let num_caches = self.sys[id].caches.len();
        for (request, action) in pending {
            // last-level caches are coherence endpoints, not propagators
            for idx in 0..num_caches {
                let level = self.sys[id].caches[idx].level;
                if self.sys[id].is_last_level(level) {
                    continue;
                }
                self.handle_coherence_action(
                    CacheRef { sys: id, idx },
                    action,
                    request.addr,
                    request.tid,
                    request.is_large,
                    0,
                    request.kind.is_translation(),
                    false,
                );
            }
        }
        debug_assert!(self.sys[id].coh_act_list.is_empty());

        self.sys[id].clk += 1;

        for request in self.sys[id].take_due_hits() {
            log::trace!("cache_sys[{}]::retire_hit({})", id, request);
        }

        for mut request in self.sys[id].take_due_waits() {
            log::trace!("cache_sys[{}]::retire_wait({})", id, request);
            let target = request.completion;
            self.release_lock(target, &mut request);
        }
    }

    fn resolve_lower(
        &self,
        r: CacheRef,
        addr: address,
        is_translation: bool,
        is_large: bool,
    ) -> Option<CacheRef> {
        let cache = self.cache(r);
        if let Some(lower) = cache.lower {
            return Some(lower);
        }
        let core = &self.cores[cache.core_id];
        core.lower_cache(
            &self.sys[core.data_sys],
            &self.sys[core.tlb_sys],
            addr,
            is_translation,
            is_large,
            cache.level,
            cache.kind,
        )
    }

    /// Send a transaction into the next cache down, rewriting the address
    /// when it crosses the translation→data boundary.
    fn forward_to_lower(
        &mut self,
        r: CacheRef,
        addr: address,
        kind: Kind,
        tid: u64,
        is_large: bool,
        curr_latency: u64,
    ) -> Option<RequestStatus> {
        let lower = self.resolve_lower(r, addr, kind.is_translation(), is_large)?;
        let (self_kind, core_id) = {
            let cache = self.cache(r);
            (cache.kind, cache.core_id)
        };
        let (lower_kind, lower_latency) = {
            let cache = self.cache(lower);
            (cache.kind, cache.latency)
        };
        let crosses_boundary = self_kind == cache::Kind::TRANSLATION_ONLY
            && lower_kind == cache::Kind::DATA_AND_TRANSLATION;
        let access_addr = if crosses_boundary {
            self.cores[core_id].get_l3_tlb_addr(addr, tid, is_large, true)
        } else {
            addr
        };
        Some(self.lookup_and_fill(lower, access_addr, kind, tid, is_large, curr_latency + lower_latency))
    }

    /// The central lookup/fill state machine of one cache level.
    ///
    /// `curr_latency` is the accumulated path latency including this
    /// cache's own lookup.
    pub fn lookup_and_fill(
        &mut self,
        r: CacheRef,
        addr: address,
        kind: Kind,
        tid: u64,
        is_large: bool,
        curr_latency: u64,
    ) -> RequestStatus {
        let is_translation = kind.is_translation();
        // broadcasted kinds reach caches through the coherence queue only
        debug_assert!(!kind.is_broadcast());
        debug_assert!(self.cache(r).kind.holds(is_translation));

        // hit: matching line, not MSHR-locked
        let hit = {
            let cache = self.cache_mut(r);
            cache.stats.accesses += 1;
            let tag = cache.tag(addr);
            let set = cache.index(addr);
            match cache.hit_way(set, tag, is_translation, tid) {
                Some(way) => {
                    let resident_addr = cache.line_addr(cache.line(set, way).tag, set);
                    let (action, resident) = {
                        let line = cache.line_mut(set, way);
                        line.dirty = line.dirty || kind.marks_dirty();
                        debug_assert_eq!(line.is_translation, is_translation);
                        let resident = (line.tid, line.is_large, line.is_translation);
                        (line.protocol.transition(kind), resident)
                    };
                    if kind.touches_replacement() {
                        cache.repl.touch(set, way);
                    }
                    cache.stats.hits += 1;
                    log::trace!(
                        "{}::lookup(addr={:#x}, kind={}) => hit way {}",
                        cache.name,
                        addr,
                        kind,
                        way
                    );
                    Some((action, resident_addr, resident))
                }
                None => None,
            }
        };
        if let Some((action, resident_addr, resident)) = hit {
            let (clk, core_id) = (self.sys[r.sys].clk, self.cache(r).core_id);
            let request = Request::new(addr, kind, tid, is_large, core_id, r);
            self.sys[r.sys].schedule_hit(clk + curr_latency, request);
            self.dispatch(r, action, addr, tid, is_large, is_translation, resident_addr, resident, curr_latency);
            return RequestStatus::REQUEST_HIT;
        }

        // MSHR match: the address is already in flight and its slot still
        // holds the matching line
        let mshr_match = {
            let cache = self.cache_mut(r);
            let tag = cache.tag(addr);
            match cache.mshrs.get(addr).copied() {
                Some(entry) => {
                    let slot_matches = {
                        let line = cache.line(entry.set, entry.way);
                        line.valid && line.tag == tag && line.is_translation == is_translation
                    };
                    if slot_matches {
                        let resident_addr = cache.line_addr(tag, entry.set);
                        let (action, resident) = {
                            let line = cache.line_mut(entry.set, entry.way);
                            if kind.marks_dirty() {
                                line.dirty = true;
                            }
                            let resident = (line.tid, line.is_large, line.is_translation);
                            (line.protocol.transition(kind), resident)
                        };
                        if kind.touches_replacement() {
                            cache.repl.touch(entry.set, entry.way);
                        }
                        cache.stats.mshr_hits += 1;
                        let still_locked = kind.is_writeback();
                        if still_locked {
                            assert!(cache.line(entry.set, entry.way).lock);
                        }
                        log::trace!(
                            "{}::lookup(addr={:#x}, kind={}) => mshr hit (locked={})",
                            cache.name,
                            addr,
                            kind,
                            still_locked
                        );
                        Some((action, resident_addr, resident, still_locked))
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some((action, resident_addr, resident, still_locked)) = mshr_match {
            self.dispatch(r, action, addr, tid, is_large, is_translation, resident_addr, resident, curr_latency);
            // the caller must know a writeback did not truly complete
            return if still_locked {
                RequestStatus::MSHR_HIT_AND_LOCKED
            } else {
                RequestStatus::MSHR_HIT
            };
        }

        // miss: allocate a locked slot and forward, or push back
        let allocated = {
            let cache = self.cache_mut(r);
            if cache.mshrs.full() {
                cache.stats.retries += 1;
                log::trace!(
                    "{}::lookup(addr={:#x}, kind={}) => retry (mshrs full)",
                    cache.name,
                    addr,
                    kind
                );
                None
            } else {
                let tag = cache.tag(addr);
                let set = cache.index(addr);
                let found = cache.find_way(set, tag, is_translation, tid);
                let needs_eviction = cache.invalid_way(set).is_none() && found.is_none();
                let way = match found {
                    Some(way) => way,
                    None => cache.repl.victim(set),
                };
                let victim = cache.line(set, way).clone();
                let victim_addr = cache.line_addr(victim.tag, set);
                {
                    let line = cache.line_mut(set, way);
                    line.valid = true;
                    line.lock = true;
                    line.tag = tag;
                    line.is_translation = is_translation;
                    line.is_large = is_large;
                    line.tid = tid;
                    line.dirty = kind.marks_dirty();
                    if needs_eviction && victim.dirty {
                        // the victim is flushed below; its protocol state
                        // must not leak into the new occupant
                        line.protocol.force_state(State::INVALID);
                    }
                }
                cache.mshrs.add(addr, mshr::Entry { kind, set, way });
                if kind.touches_replacement() {
                    cache.repl.touch(set, way);
                }
                cache.stats.misses += 1;
                log::trace!(
                    "{}::lookup(addr={:#x}, kind={}) => miss (way {}, evict={})",
                    cache.name,
                    addr,
                    kind,
                    way,
                    needs_eviction
                );
                Some((set, way, needs_eviction, victim, victim_addr))
            }
        };
        let Some((set, way, needs_eviction, victim, victim_addr)) = allocated else {
            return RequestStatus::REQUEST_RETRY;
        };

        if needs_eviction {
            self.evict(r, set, &victim);
        }

        // forward the miss
        let (sys_is_translation, is_last, core_id, clk, memory_latency) = {
            let sys = &self.sys[r.sys];
            let cache = &sys.caches[r.idx];
            (
                sys.is_translation_hier,
                sys.is_last_level(cache.level),
                cache.core_id,
                sys.clk,
                sys.memory_latency,
            )
        };
        let own_hier_writeback = kind.is_writeback() && is_translation == sys_is_translation;
        if !is_last && !own_hier_writeback {
            self.forward_to_lower(r, addr, kind, tid, is_large, curr_latency);
        } else if is_last && is_translation == sys_is_translation {
            // the hierarchy that owns this domain bottoms out at memory
            let at = clk + curr_latency + memory_latency;
            let request = Request::new(addr, kind, tid, is_large, core_id, r);
            log::debug!(
                "{}::miss(addr={:#x}) => memory, retires at cycle {}",
                self.cache(r).name,
                addr,
                at
            );
            self.sys[r.sys].schedule_wait(at, request);
        } else if is_last {
            // last level of the data hierarchy, translation entry: the
            // last-level TLB backs it
            self.forward_to_lower(r, addr, kind, tid, is_large, curr_latency);
        }

        // coherence for the miss itself; this is what announces it to peers
        let (action, victim_identity) = {
            let cache = self.cache_mut(r);
            let line = cache.line_mut(set, way);
            (
                line.protocol.transition(kind),
                (victim.tid, victim.is_large, victim.is_translation),
            )
        };
        self.dispatch(r, action, addr, tid, is_large, is_translation, victim_addr, victim_identity, curr_latency);
        RequestStatus::REQUEST_MISS
    }

    /// Execute a transition's action with the subject-selection rule: a
    /// memory writeback concerns the resident (or just-evicted) line, a
    /// broadcast concerns the requested address.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        r: CacheRef,
        action: Action,
        addr: address,
        tid: u64,
        is_large: bool,
        is_translation: bool,
        resident_addr: address,
        resident: (u64, bool, bool),
        curr_latency: u64,
    ) {
        let (subject_addr, subject_tid, subject_large, subject_translation) =
            if action.is_memory_writeback() {
                (resident_addr, resident.0, resident.1, resident.2)
            } else {
                (addr, tid, is_large, is_translation)
            };
        self.handle_coherence_action(
            r,
            action,
            subject_addr,
            subject_tid,
            subject_large,
            curr_latency,
            subject_translation,
            true,
        );
    }

    /// Remove a victim: back-invalidate the levels above if this cache is
    /// inclusive, then write the line back below if it was dirty.
    fn evict(&mut self, r: CacheRef, set: usize, victim: &Line) {
        let (evict_addr, higher, inclusive, name) = {
            let cache = self.cache(r);
            (
                cache.line_addr(victim.tag, set),
                cache.higher.clone(),
                cache.inclusive,
                cache.name.clone(),
            )
        };
        log::trace!(
            "{}::evict(addr={:#x}, dirty={}, translation={})",
            name,
            evict_addr,
            victim.dirty,
            victim.is_translation
        );
        if inclusive {
            // blind back-invalidation is safe: lookup filters on the
            // translation flag and tid
            for h in &higher {
                self.invalidate(*h, evict_addr, victim.tid, victim.is_translation);
            }
        }
        if victim.dirty {
            let wb_kind = if victim.is_translation {
                Kind::TRANSLATION_WRITEBACK
            } else {
                Kind::DATA_WRITEBACK
            };
            match self.forward_to_lower(r, evict_addr, wb_kind, victim.tid, victim.is_large, 0) {
                Some(status) => {
                    if inclusive {
                        assert!(
                            matches!(
                                status,
                                RequestStatus::REQUEST_HIT | RequestStatus::MSHR_HIT_AND_LOCKED
                            ),
                            "{name}: dirty eviction of {evict_addr:#x} missed in an inclusive lower cache",
                        );
                    }
                }
                None => {
                    // no lower cache: written back to memory
                }
            }
        } else if let Some(lower) =
            self.resolve_lower(r, evict_addr, victim.is_translation, victim.is_large)
        {
            if inclusive {
                // clean lines may be dropped, but inclusion means the level
                // below still holds the block
                let check_addr = self.boundary_addr(r, lower, evict_addr, victim.tid, victim.is_large);
                let lower_cache = self.cache(lower);
                assert!(
                    lower_cache.holds_line(check_addr, victim.tid, victim.is_translation),
                    "{name}: clean eviction of {evict_addr:#x} not covered by the lower cache",
                );
            }
        }
    }

    /// The address a line travels under once it reaches `lower`.
    fn boundary_addr(
        &mut self,
        r: CacheRef,
        lower: CacheRef,
        addr: address,
        tid: u64,
        is_large: bool,
    ) -> address {
        let crosses = self.cache(r).kind == cache::Kind::TRANSLATION_ONLY
            && self.cache(lower).kind == cache::Kind::DATA_AND_TRANSLATION;
        if crosses {
            let core_id = self.cache(r).core_id;
            self.cores[core_id].get_l3_tlb_addr(addr, tid, is_large, true)
        } else {
            addr
        }
    }

    /// Clear the line here and in every cache above.
    pub fn invalidate(&mut self, r: CacheRef, addr: address, tid: u64, is_translation: bool) {
        self.cache_mut(r).invalidate_local(addr, tid, is_translation);
        let higher = self.cache(r).higher.clone();
        for h in higher {
            self.invalidate(h, addr, tid, is_translation);
        }
    }

    /// A wait-list entry retired: release the MSHR here and propagate the
    /// completion to the levels above.
    pub fn release_lock(&mut self, r: CacheRef, request: &mut Request) {
        {
            let cache = self.cache_mut(r);
            if let Some(entry) = cache.mshrs.get(request.addr).copied() {
                let tag = cache.tag(request.addr);
                // the slot may have been stolen by an eviction while it was
                // locked; the lock then belongs to the thief
                if cache.line(entry.set, entry.way).tag == tag {
                    cache.line_mut(entry.set, entry.way).lock = false;
                }
                cache.mshrs.remove(request.addr);
                debug_assert!(cache.mshrs.get(request.addr).is_none());
                log::trace!("{}::release_lock(addr={:#x})", cache.name, request.addr);
            }
        }

        let (level, kind, core_id) = {
            let cache = self.cache(r);
            (cache.level, cache.kind, cache.core_id)
        };
        if level == 1 && kind == cache::Kind::DATA_ONLY {
            self.cores[core_id].rob.mem_mark_done(request.addr, request.kind);
        }

        self.propagate_release_lock(r, request);
    }

    fn propagate_release_lock(&mut self, r: CacheRef, request: &mut Request) {
        let (higher_list, self_kind, level, owner_core) = {
            let cache = self.cache(r);
            (cache.higher.clone(), cache.kind, cache.level, cache.core_id)
        };
        let (is_last, is_translation_hier) = {
            let sys = &self.sys[r.sys];
            (sys.is_last_level(level), sys.is_translation_hier)
        };
        for h in higher_list {
            let (h_kind, h_core, h_is_small_tlb) = {
                let higher = self.cache(h);
                (higher.kind, higher.core_id, !higher.is_large_page_tlb)
            };
            if !h_kind.holds(request.is_translation()) {
                continue;
            }
            // releases leaving the shared bottom of the data hierarchy only
            // climb back into their own core
            let routed = (request.core_id == h_core && is_last && !is_translation_hier)
                || !is_last
                || (is_last && is_translation_hier);
            if !routed {
                continue;
            }
            let data_to_translation = self_kind == cache::Kind::DATA_AND_TRANSLATION
                && h_kind == cache::Kind::TRANSLATION_ONLY;
            let in_translation_chain = self_kind == cache::Kind::TRANSLATION_ONLY
                && h_kind == cache::Kind::TRANSLATION_ONLY;
            let (access_addr, mut propagate) = if data_to_translation {
                self.cores[owner_core].retrieve_addr(
                    request.addr,
                    request.tid,
                    request.is_large,
                    h_is_small_tlb,
                )
            } else {
                (request.addr, true)
            };
            propagate = propagate
                && (!in_translation_chain || request.is_large == !h_is_small_tlb);
            if propagate {
                request.addr = access_addr;
                self.release_lock(h, request);
            }
        }
    }

    /// Execute one coherence action on behalf of `r`.
    ///
    /// With `same_cache_sys`, `r` is where the protocol transition
    /// happened: memory writebacks descend from here and broadcasts are
    /// queued into every peer hierarchy, to be applied at their next tick.
    /// Without it, `r` is a peer cache receiving a broadcast: it settles
    /// its own copy, invalidating on a broadcast write.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_coherence_action(
        &mut self,
        r: CacheRef,
        action: Action,
        addr: address,
        tid: u64,
        is_large: bool,
        curr_latency: u64,
        is_translation: bool,
        same_cache_sys: bool,
    ) {
        match action {
            Action::NONE => {}
            Action::MEMORY_DATA_WRITEBACK | Action::MEMORY_TRANSLATION_WRITEBACK => {
                let kind = action.txn_kind().expect("writeback action carries a kind");
                // no lower cache means the flush goes straight to memory
                self.forward_to_lower(r, addr, kind, tid, is_large, curr_latency);
            }
            _ => {
                let (level, core_id) = {
                    let cache = self.cache(r);
                    (cache.level, cache.core_id)
                };
                let is_last = self.sys[r.sys].is_last_level(level);
                if same_cache_sys && !is_last {
                    let peers = self.sys[r.sys].peers.clone();
                    if !peers.is_empty() {
                        log::debug!(
                            "{}::broadcast({:?}, addr={:#x}) to {} peers",
                            self.cache(r).name,
                            action,
                            addr,
                            style(peers.len()).cyan(),
                        );
                    }
                    for peer in peers {
                        // the synthetic write request records whether a
                        // translation access triggered the broadcast
                        let kind = if is_translation {
                            Kind::TRANSLATION_WRITE
                        } else {
                            Kind::DATA_WRITE
                        };
                        let request = Request::new(addr, kind, tid, is_large, core_id, r);
                        self.sys[peer].queue_coherence(request, action);
                    }
                } else if !same_cache_sys {
                    // we are the peer: settle our copy of the line
                    let follow_up = {
                        let cache = self.cache_mut(r);
                        let broadcast_translation = action.is_translation();
                        let tag = cache.tag(addr);
                        let set = cache.index(addr);
                        match cache.find_way(set, tag, broadcast_translation, tid) {
                            Some(way) => {
                                let kind =
                                    action.txn_kind().expect("broadcast action carries a kind");
                                let line = cache.line_mut(set, way);
                                let follow = line.protocol.transition(kind);
                                if kind.op == Op::BROADCASTED_WRITE {
                                    line.valid = false;
                                    assert_eq!(line.protocol.state(), State::INVALID);
                                }
                                let identity = (line.tid, line.is_large);
                                (follow != Action::NONE)
                                    .then_some((follow, identity, broadcast_translation))
                            }
                            None => None,
                        }
                    };
                    if let Some((follow, (line_tid, line_large), line_translation)) = follow_up {
                        // flushing an invalidated MODIFIED/OWNER copy
                        self.handle_coherence_action(
                            r,
                            follow,
                            addr,
                            line_tid,
                            line_large,
                            curr_latency,
                            line_translation,
                            false,
                        );
                    }
                }
            }
        }
    }
}
