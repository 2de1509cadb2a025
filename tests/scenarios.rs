use color_eyre::eyre;
use tlbsim::cache;
use tlbsim::coherence::{Action, State};
use tlbsim::config;
use tlbsim::{Kind, RequestStatus, Simulator};

fn data_cache(name: &str, index_bits: u32, associativity: usize, latency: u64) -> config::Cache {
    config::Cache {
        name: name.to_string(),
        kind: cache::Kind::DATA_ONLY,
        line_offset_bits: 6,
        index_bits,
        associativity,
        latency,
        ..config::Cache::default()
    }
}

fn tlb(name: &str, is_large: bool, latency: u64) -> config::Cache {
    config::Cache {
        name: name.to_string(),
        kind: cache::Kind::TRANSLATION_ONLY,
        // tagged on page granularity
        line_offset_bits: if is_large { 21 } else { 12 },
        index_bits: 2,
        associativity: 4,
        latency,
        is_large_page_tlb: is_large,
        ..config::Cache::default()
    }
}

/// Single core, data only: L1 1-way, L2 2-way, both single-set and
/// inclusive, 64B lines, latencies 1/10, memory 100.
fn single_core_data() -> eyre::Result<(Simulator, usize)> {
    let mut sim = Simulator::new(config::Hierarchy {
        memory_latency: 100,
    });
    let core = sim.add_core(&config::Core::default());
    sim.add_data_cache(core, data_cache("l1d", 0, 1, 1))?;
    sim.add_data_cache(core, data_cache("l2d", 0, 2, 10))?;
    sim.finalize()?;
    Ok((sim, core))
}

/// Single core with the full dual hierarchy: three data levels ending in a
/// translation-capable LLC, and a three-level small/large TLB chain.
fn single_core_full() -> eyre::Result<(Simulator, usize)> {
    let mut sim = Simulator::new(config::Hierarchy {
        memory_latency: 100,
    });
    let core = sim.add_core(&config::Core::default());
    sim.add_data_cache(core, data_cache("l1d", 4, 4, 1))?;
    sim.add_data_cache(core, data_cache("l2d", 4, 8, 10))?;
    sim.add_data_cache(
        core,
        config::Cache {
            kind: cache::Kind::DATA_AND_TRANSLATION,
            ..data_cache("llc", 6, 8, 30)
        },
    )?;
    sim.add_tlb(core, tlb("l1s-tlb", false, 1))?;
    sim.add_tlb(core, tlb("l1l-tlb", true, 1))?;
    sim.add_tlb(core, tlb("l2s-tlb", false, 4))?;
    sim.add_tlb(core, tlb("l2l-tlb", true, 4))?;
    sim.add_tlb(
        core,
        config::Cache {
            // indexed by synthetic slot addresses, one entry per line
            line_offset_bits: 6,
            ..tlb("l3s-tlb", false, 10)
        },
    )?;
    sim.add_tlb(
        core,
        config::Cache {
            line_offset_bits: 6,
            ..tlb("l3l-tlb", true, 10)
        },
    )?;
    sim.finalize()?;
    Ok((sim, core))
}

fn run(sim: &mut Simulator, cycles: u64) {
    for _ in 0..cycles {
        sim.tick();
    }
}

fn line_of(sim: &Simulator, r: tlbsim::CacheRef, addr: u64, tid: u64, translation: bool) -> tlbsim::cache::Line {
    let cache = sim.cache(r);
    let set = cache.index(addr);
    let way = cache
        .find_way(set, cache.tag(addr), translation, tid)
        .expect("line not resident");
    cache.line(set, way).clone()
}

#[test]
fn cold_miss_fills_both_levels_and_notifies_rob_once() -> eyre::Result<()> {
    let (mut sim, core) = single_core_data()?;
    let status = sim.access(core, 0x0000, Kind::DATA_READ, 0, false);
    assert_eq!(status, RequestStatus::REQUEST_MISS);

    let data_sys = sim.core(core).data_sys;
    let waiting: Vec<_> = sim.sys[data_sys].wait_list.keys().copied().collect();
    assert_eq!(waiting, vec![111], "miss retires after 1 + 10 + 100 cycles");

    run(&mut sim, 111);

    for idx in [0, 1] {
        let r = tlbsim::CacheRef { sys: data_sys, idx };
        let line = line_of(&sim, r, 0x0000, 0, false);
        assert!(line.valid);
        assert!(!line.lock);
    }
    assert_eq!(sim.core(core).rob.times_retired(0x0000), 1);
    assert!(sim.sys[data_sys].wait_list.is_empty());
    Ok(())
}

#[test]
fn clean_eviction_leaves_the_block_in_the_lower_level() -> eyre::Result<()> {
    let (mut sim, core) = single_core_data()?;
    let data_sys = sim.core(core).data_sys;
    let l1 = tlbsim::CacheRef { sys: data_sys, idx: 0 };
    let l2 = tlbsim::CacheRef { sys: data_sys, idx: 1 };

    sim.access(core, 0x0000, Kind::DATA_READ, 0, false);
    run(&mut sim, 111);

    // same single L1 set: the second read evicts the clean first line
    let status = sim.access(core, 0x0040, Kind::DATA_READ, 0, false);
    assert_eq!(status, RequestStatus::REQUEST_MISS);

    assert!(!sim.cache(l1).holds_line(0x0000, 0, false));
    assert!(sim.cache(l2).holds_line(0x0000, 0, false));
    assert!(sim.cache(l1).holds_line(0x0040, 0, false));
    Ok(())
}

#[test]
fn dirty_eviction_writes_back_and_resets_the_slot() -> eyre::Result<()> {
    let (mut sim, core) = single_core_data()?;
    let data_sys = sim.core(core).data_sys;
    let l2 = tlbsim::CacheRef { sys: data_sys, idx: 1 };

    sim.access(core, 0x0000, Kind::DATA_WRITE, 0, false);
    run(&mut sim, 111);

    let before = sim.cache(l2).stats.hits;
    sim.access(core, 0x1000, Kind::DATA_READ, 0, false);

    // the writeback was filed into L2 and completed there
    assert_eq!(sim.cache(l2).stats.hits, before + 1);
    let l2_line = line_of(&sim, l2, 0x0000, 0, false);
    assert!(l2_line.dirty);
    assert_eq!(l2_line.protocol.state(), State::MODIFIED);
    Ok(())
}

fn two_core_data() -> eyre::Result<(Simulator, usize, usize)> {
    let mut sim = Simulator::new(config::Hierarchy {
        memory_latency: 100,
    });
    let a = sim.add_core(&config::Core::default());
    let b = sim.add_core(&config::Core::default());
    for core in [a, b] {
        sim.add_data_cache(core, data_cache("l1d", 0, 2, 1))?;
        sim.add_data_cache(core, data_cache("l2d", 0, 4, 10))?;
    }
    sim.finalize()?;
    Ok((sim, a, b))
}

#[test]
fn peer_write_invalidates_shared_copies_next_cycle() -> eyre::Result<()> {
    let (mut sim, a, b) = two_core_data()?;
    let b_data = sim.core(b).data_sys;
    let b_l1 = tlbsim::CacheRef { sys: b_data, idx: 0 };
    let b_l2 = tlbsim::CacheRef { sys: b_data, idx: 1 };

    sim.access(b, 0x0000, Kind::DATA_READ, 0, false);
    run(&mut sim, 111);
    assert_eq!(
        line_of(&sim, b_l1, 0x0000, 0, false).protocol.state(),
        State::SHARED
    );

    let (set, way) = {
        let cache = sim.cache(b_l1);
        let set = cache.index(0x0000);
        (set, cache.find_way(set, cache.tag(0x0000), false, 0).unwrap())
    };

    sim.access(a, 0x0000, Kind::DATA_WRITE, 0, false);
    let queued: Vec<_> = sim.sys[b_data]
        .coh_act_list
        .iter()
        .map(|(request, action)| (request.addr, *action))
        .collect();
    assert_eq!(queued, vec![(0x0000, Action::BROADCAST_DATA_WRITE)]);

    // applied at B's next tick, on every level except the last
    sim.tick();
    assert!(!sim.cache(b_l1).holds_line(0x0000, 0, false));
    let line = sim.cache(b_l1).line(set, way);
    assert!(!line.valid);
    assert_eq!(line.protocol.state(), State::INVALID);
    assert!(sim.cache(b_l2).holds_line(0x0000, 0, false));
    Ok(())
}

#[test]
fn invalidating_a_modified_copy_flushes_it_below() -> eyre::Result<()> {
    let (mut sim, a, b) = two_core_data()?;
    let b_data = sim.core(b).data_sys;
    let b_l1 = tlbsim::CacheRef { sys: b_data, idx: 0 };
    let b_l2 = tlbsim::CacheRef { sys: b_data, idx: 1 };

    sim.access(b, 0x0000, Kind::DATA_WRITE, 0, false);
    run(&mut sim, 111);
    assert_eq!(
        line_of(&sim, b_l1, 0x0000, 0, false).protocol.state(),
        State::MODIFIED
    );

    // a remote reader demotes the modified copy to owner
    sim.access(a, 0x0000, Kind::DATA_READ, 0, false);
    sim.tick();
    assert_eq!(
        line_of(&sim, b_l1, 0x0000, 0, false).protocol.state(),
        State::OWNER
    );

    // a remote writer invalidates it; the dirty copy is written back into
    // B's L2 while it is invalidated
    let hits_before = sim.cache(b_l2).stats.hits;
    sim.access(a, 0x0000, Kind::DATA_WRITE, 0, false);
    sim.tick();
    assert!(!sim.cache(b_l1).holds_line(0x0000, 0, false));
    assert_eq!(sim.cache(b_l2).stats.hits, hits_before + 1);
    Ok(())
}

#[test]
fn translation_miss_crosses_into_the_data_hierarchy_and_back() -> eyre::Result<()> {
    let (mut sim, core) = single_core_full()?;
    let tlb_sys = sim.core(core).tlb_sys;
    let data_sys = sim.core(core).data_sys;
    let l1s = tlbsim::CacheRef { sys: tlb_sys, idx: 0 };
    let l2s = tlbsim::CacheRef { sys: tlb_sys, idx: 2 };
    let l3s = tlbsim::CacheRef { sys: tlb_sys, idx: 4 };
    let llc = tlbsim::CacheRef { sys: data_sys, idx: 2 };

    let status = sim.access(core, 0x2000, Kind::TRANSLATION_READ, 7, false);
    assert_eq!(status, RequestStatus::REQUEST_MISS);

    // the page-table entry is fetched through the data LLC at the synthetic
    // slot address inside the small-page window
    let slot_size = config::Core::default().l3_small_tlb_size;
    let slot = {
        let cache = sim.cache(llc);
        let entries: Vec<_> = (0..cache.num_sets())
            .flat_map(|set| (0..cache.associativity()).map(move |way| (set, way)))
            .filter(|&(set, way)| cache.line(set, way).valid && cache.line(set, way).is_translation)
            .map(|(set, way)| cache.line_addr(cache.line(set, way).tag, set))
            .collect();
        assert_eq!(entries.len(), 1);
        entries[0]
    };
    assert!(slot < slot_size);

    // the page walk bottoms out in the translation hierarchy's wait list
    assert_eq!(sim.sys[tlb_sys].wait_list.len(), 1);

    run(&mut sim, 200);

    // release propagated back across the boundary, rewriting the synthetic
    // address to the original virtual address
    for r in [l1s, l2s] {
        let line = line_of(&sim, r, 0x2000, 7, true);
        assert!(line.valid && !line.lock);
    }
    for r in [llc, l3s] {
        let line = line_of(&sim, r, slot, 7, true);
        assert!(line.valid && !line.lock);
    }
    // translation traffic never reports to the ROB
    assert!(sim.core(core).rob.retired.is_empty());
    Ok(())
}

#[test]
fn blocking_tlb_applies_retry_backpressure() -> eyre::Result<()> {
    let (mut sim, core) = single_core_full()?;

    let first = sim.access(core, 0x2000, Kind::TRANSLATION_READ, 7, false);
    let second = sim.access(core, 0x5000, Kind::TRANSLATION_READ, 7, false);
    assert_eq!(first, RequestStatus::REQUEST_MISS);
    assert_eq!(second, RequestStatus::REQUEST_RETRY);

    run(&mut sim, 200);

    let retried = sim.access(core, 0x5000, Kind::TRANSLATION_READ, 7, false);
    assert_eq!(retried, RequestStatus::REQUEST_MISS);
    Ok(())
}

#[test]
fn replay_is_deterministic() -> eyre::Result<()> {
    let trace = [
        (0usize, 0x0000u64, Kind::DATA_READ),
        (1, 0x0000, Kind::DATA_WRITE),
        (0, 0x0040, Kind::DATA_WRITE),
        (1, 0x1000, Kind::DATA_READ),
        (0, 0x0000, Kind::DATA_READ),
    ];

    let (mut first, a1, b1) = two_core_data()?;
    let (mut second, a2, b2) = two_core_data()?;
    assert_eq!((a1, b1), (a2, b2));

    for &(core, addr, kind) in &trace {
        first.access(core, addr, kind, 0, false);
        second.access(core, addr, kind, 0, false);
        for _ in 0..30 {
            first.tick();
            second.tick();
            for sys in 0..first.sys.len() {
                assert_eq!(
                    first.sys[sys].event_snapshot(),
                    second.sys[sys].event_snapshot(),
                    "event lists diverged"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn repeated_invalidation_is_idempotent() -> eyre::Result<()> {
    let (mut sim, core) = single_core_data()?;
    let data_sys = sim.core(core).data_sys;
    let l2 = tlbsim::CacheRef { sys: data_sys, idx: 1 };

    sim.access(core, 0x0000, Kind::DATA_READ, 0, false);
    run(&mut sim, 111);

    sim.invalidate(l2, 0x0000, 0, false);
    let snapshot: Vec<_> = sim.sys[data_sys]
        .caches
        .iter()
        .map(|cache| cache.sets.clone())
        .collect();
    sim.invalidate(l2, 0x0000, 0, false);
    let again: Vec<_> = sim.sys[data_sys]
        .caches
        .iter()
        .map(|cache| cache.sets.clone())
        .collect();
    assert_eq!(snapshot, again);
    Ok(())
}
