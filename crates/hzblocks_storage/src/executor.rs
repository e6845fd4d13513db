//! Drives a `Query` through its resolutions.
//!
//! `execute` turns the current step of a query into block requests, sends them all to the access before waiting on any, and
//! merges each block as it completes, in whatever order that happens. Writes go block by block instead, each one a locked
//! read-merge-write. Point queries reuse the read path, grouping their points by the block holding each one.

use crate::block::{block_samples, required_blocks};
use crate::filter::adjust_filter_box;
use crate::{
    insert_samples, interpolate_samples, Aborted, Access, Array, BlockQuery, Dataset, Field, IdxError,
    IoMode, PointQuery, Query, QueryStatus, SharedBlockQuery, ABORTED_MESSAGE,
};

use futures::{executor::block_on, stream::FuturesUnordered, FutureExt, StreamExt};
use hzblocks_core::{BoxNi, LogicSamples, PointNi};
use std::collections::BTreeMap;

/// Validates a created query and positions it at the first end resolution that covers any sample of its box.
pub(crate) fn begin(dataset: &Dataset, query: &mut Query) -> bool {
    if query.status() != QueryStatus::Created {
        return query.is_running();
    }

    if query.aborted.is_aborted() {
        return fail(query, ABORTED_MESSAGE);
    }

    if let Err(message) = check_field_and_time(dataset, &mut query.field, query.time) {
        return fail(query, message);
    }

    if !query.logic_box.valid() || query.logic_box.pdim() != dataset.logic_box().pdim() {
        return fail(query, "query logic_box not valid");
    }
    if !query.logic_box.intersection(dataset.logic_box()).is_full_dim() {
        return fail(query, "user_box not valid");
    }

    if let Err(message) = check_end_resolutions(dataset, &mut query.end_resolutions) {
        return fail(query, message);
    }

    // Filters only apply to reads.
    if query.filter.enabled && query.mode.is_read() {
        match dataset.create_filter(&query.field) {
            Some(filter) => query.filter.filter = Some(filter),
            None => query.disable_filters(),
        }
    } else {
        query.disable_filters();
    }

    for cursor in 0..query.end_resolutions.len() {
        let end = query.end_resolutions[cursor];
        if set_end_resolution(dataset, query, end) {
            query.end_cursor = Some(cursor);
            query.set_running();
            tracing::debug!(?query, "query running");
            return true;
        }
    }

    fail(query, "cannot find a good end_resolution to start with")
}

/// Resolves the field index against the dataset and checks the timestep.
fn check_field_and_time(dataset: &Dataset, field: &mut Field, time: f64) -> Result<(), String> {
    match dataset.field(&field.name) {
        Some(found) if found.dtype == field.dtype && field.valid() => field.index = found.index,
        _ => return Err("field not valid".to_string()),
    }

    if !dataset.timesteps().iter().any(|t| *t == time) {
        return Err("wrong time".to_string());
    }

    Ok(())
}

/// Defaults an empty progression to the maximum resolution. The progression must increase and stay within it.
fn check_end_resolutions(dataset: &Dataset, end_resolutions: &mut Vec<usize>) -> Result<(), String> {
    let maxh = dataset.max_resolution();
    if end_resolutions.is_empty() {
        end_resolutions.push(maxh);
    }
    let increasing = end_resolutions.windows(2).all(|w| w[0] < w[1]);
    if !increasing || end_resolutions.iter().any(|h| *h > maxh) {
        return Err(format!(
            "wrong end resolution {:?} (max {})",
            end_resolutions, maxh
        ));
    }

    Ok(())
}

/// Computes the lattice holding every sample of levels `0..=end` inside the (filter-adjusted) query box. Returns `false` when
/// there is no such sample.
fn set_end_resolution(dataset: &Dataset, query: &mut Query, end: usize) -> bool {
    let hzorder = dataset.hzorder();

    let mut delta = hzorder.level_delta(end);
    if end > 0 {
        delta[hzorder.bitmask()[end]] >>= 1;
    }

    let mut logic_box = query.logic_box;
    if let Some(filter) = query.filter.filter.clone() {
        logic_box = adjust_filter_box(filter.as_ref(), &query.filter.domain, &logic_box, end);
        query.filter.adjusted_logic_box = logic_box;
    }

    let mut bounds: Option<(PointNi, PointNi)> = None;
    for h in 0..=end {
        let level = hzorder.level_samples(h);
        let aligned = level.align_box(&logic_box);
        if !aligned.is_full_dim() {
            continue;
        }
        let p1 = aligned.p1;
        let p2_included = aligned.p2 - level.delta;
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.meet(&p1), hi.join(&p2_included)),
            None => (p1, p2_included),
        });
    }

    match bounds {
        Some((p1, p2_included)) => {
            query.logic_samples = LogicSamples::new(BoxNi::new(p1, p2_included + delta), delta);
            true
        }
        None => false,
    }
}

/// Reads or writes the samples of the current step. Returns `false` when the query cannot execute or fails.
pub(crate) fn execute(dataset: &Dataset, access: &mut dyn Access, query: &mut Query) -> bool {
    if !query.can_execute() {
        return false;
    }
    if query.aborted.is_aborted() {
        return fail(query, ABORTED_MESSAGE);
    }

    match query.mode {
        IoMode::Read => query.allocate_buffer_if_needed(),
        IoMode::Write => {
            if !query.buffer.valid() {
                return fail(query, "write buffer not set");
            }
            if query.buffer.dims() != query.nsamples() || query.buffer.dtype() != query.field.dtype {
                let message = format!(
                    "write buffer is {} {} but the query needs {} {}",
                    query.buffer.dims(),
                    query.buffer.dtype(),
                    query.nsamples(),
                    query.field.dtype
                );
                return fail(query, message);
            }
        }
    }

    if query.mode.is_read() && query.filter.filter.is_some() {
        return execute_filtered(dataset, access, query);
    }

    #[cfg(feature = "trace")]
    let _span = tracing::debug_span!("execute", end = query.end_resolution()).entered();

    let hzorder = dataset.hzorder();
    let bitsperblock = dataset.bitsperblock();
    let end = query.end_resolution() as usize;
    let blocks = match required_blocks(
        hzorder,
        bitsperblock,
        &query.logic_samples.logic_box,
        (query.cur_resolution + 1) as usize,
        end,
        &query.aborted,
    ) {
        Ok(blocks) => blocks,
        Err(e) => return fail(query, e.to_string()),
    };

    // Blocks of the power-of-2 box that lie outside the dataset box were never stored.
    let dataset_box = dataset.logic_box();
    let blocks: Vec<u64> = blocks
        .into_iter()
        .filter(|b| {
            block_samples(hzorder, bitsperblock, *b)
                .logic_box
                .strictly_intersects(dataset_box)
        })
        .collect();
    tracing::debug!(nblocks = blocks.len(), end, "executing query");

    let opened = open_session(access, query.mode);
    let done = match query.mode {
        IoMode::Read => read_blocks(dataset, access, query, &blocks),
        IoMode::Write => write_blocks(dataset, access, query, &blocks),
    };

    if opened {
        access.end_io();
    }
    if !done {
        return false;
    }
    if query.aborted.is_aborted() {
        return fail(query, ABORTED_MESSAGE);
    }

    query.cur_resolution = end as i32;

    true
}

/// Opens a session in `mode` on `access`, closing one in the other mode first. Returns `true` when the caller must close it.
fn open_session(access: &mut dyn Access, mode: IoMode) -> bool {
    if access.info().mode == Some(mode) {
        return false;
    }
    if access.info().mode.is_some() {
        access.end_io();
    }
    access.begin_io(mode);

    true
}

pub(crate) fn new_block_query(
    dataset: &Dataset,
    field: &Field,
    time: f64,
    mode: IoMode,
    blockid: u64,
    aborted: &Aborted,
) -> SharedBlockQuery {
    let samples = block_samples(dataset.hzorder(), dataset.bitsperblock(), blockid);

    BlockQuery::new(field.clone(), time, mode, blockid, samples, aborted.clone()).shared()
}

/// Sends the block to `access` and blocks until it completes. Returns `true` when it completed `Ok`.
pub(crate) fn execute_block_and_wait(access: &mut dyn Access, block: &SharedBlockQuery) -> bool {
    block.set_running();
    match block.mode {
        IoMode::Read => access.read_block(block.clone()),
        IoMode::Write => access.write_block(block.clone()),
    }
    access.flush();
    block.completion().wait();

    block.ok()
}

/// Sends a read of every block before waiting on any, then hands each block that arrives to `merge`, in completion order.
///
/// A block that fails to read is skipped when the dataset tolerates missing blocks. Returning early drops whatever is still
/// in flight.
fn fetch_blocks(
    dataset: &Dataset,
    access: &mut dyn Access,
    field: &Field,
    time: f64,
    aborted: &Aborted,
    blocks: &[u64],
    mut merge: impl FnMut(&BlockQuery),
) -> Result<(), String> {
    let mut pending = FuturesUnordered::new();
    for &blockid in blocks {
        if aborted.is_aborted() {
            return Err(ABORTED_MESSAGE.to_string());
        }
        let block = new_block_query(dataset, field, time, IoMode::Read, blockid, aborted);
        block.set_running();
        access.read_block(block.clone());
        pending.push(block.completion().map(move |_| block));
    }
    access.flush();

    block_on(async {
        while let Some(block) = pending.next().await {
            if block.failed() {
                if aborted.is_aborted() {
                    return Err(ABORTED_MESSAGE.to_string());
                }
                if !dataset.missing_blocks() {
                    return Err(block.error_message());
                }
                tracing::warn!(
                    blockid = block.blockid,
                    reason = %block.error_message(),
                    "missing block, keeping default values"
                );
                continue;
            }

            merge(&block);
            if aborted.is_aborted() {
                return Err(ABORTED_MESSAGE.to_string());
            }
        }

        Ok(())
    })
}

fn read_blocks(dataset: &Dataset, access: &mut dyn Access, query: &mut Query, blocks: &[u64]) -> bool {
    let field = query.field.clone();
    let aborted = query.aborted.clone();
    let time = query.time;
    let fetched = fetch_blocks(dataset, access, &field, time, &aborted, blocks, |block| {
        merge_block(dataset, query, block)
    });

    match fetched {
        Ok(()) => true,
        Err(message) => fail(query, message),
    }
}

fn write_blocks(dataset: &Dataset, access: &mut dyn Access, query: &mut Query, blocks: &[u64]) -> bool {
    if !access.info().can_write {
        let e = IdxError::not_supported(format!("{} is read-only", access.info().name));
        return fail(query, e.to_string());
    }

    for &blockid in blocks {
        if query.aborted.is_aborted() {
            return fail(query, ABORTED_MESSAGE);
        }

        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("write_block", blockid).entered();

        let read = new_block_query(dataset, &query.field, query.time, IoMode::Read, blockid, &query.aborted);
        if let Err(e) = access.acquire_write_lock(&read) {
            return fail(query, e.to_string());
        }

        // Samples of the block outside the query box must survive the write.
        let write = new_block_query(dataset, &query.field, query.time, IoMode::Write, blockid, &query.aborted);
        if execute_block_and_wait(access, &read) {
            write.set_buffer(read.take_buffer());
        }
        write.allocate_buffer_if_needed();
        merge_block(dataset, query, &write);

        execute_block_and_wait(access, &write);

        let released = access.release_write_lock(&read);
        if write.failed() {
            return fail(query, write.error_message());
        }
        if let Err(e) = released {
            return fail(query, e.to_string());
        }
    }

    true
}

/// Copies samples between a block and the query, towards the query when reading and towards the block when writing.
///
/// Block 0 interleaves several levels on one lattice, so it is merged level by level: only levels above the current
/// resolution take part, and a progressive read keeps the coarser samples it already has.
fn merge_block(dataset: &Dataset, query: &mut Query, block: &BlockQuery) {
    let hzorder = dataset.hzorder();
    let end = query.end_resolution();
    let cur = query.cur_resolution;
    let aborted = query.aborted.clone();

    let mut block_buffer = block.buffer();
    let (write, wsamples, read, rsamples) = match query.mode {
        IoMode::Read => (
            &mut query.buffer,
            &query.logic_samples,
            &*block_buffer,
            &block.logic_samples,
        ),
        IoMode::Write => (
            &mut *block_buffer,
            &block.logic_samples,
            &query.buffer,
            &query.logic_samples,
        ),
    };

    if block.blockid != 0 {
        insert_samples(write, wsamples, read, rsamples, &aborted);
        return;
    }

    let hstart = (cur + 1).max(0) as usize;
    let hend = (end.max(0) as usize).min(dataset.bitsperblock());
    for h in hstart..=hend {
        if aborted.is_aborted() {
            return;
        }
        let level = hzorder.level_samples(h);
        let mut level_buffer = Array::new(level.nsamples, write.dtype());
        insert_samples(&mut level_buffer, &level, write, wsamples, &aborted);
        insert_samples(&mut level_buffer, &level, read, rsamples, &aborted);
        insert_samples(write, wsamples, &level_buffer, &level, &aborted);
    }
}

/// Moves a query that completed its step to the next end resolution, seeding the finer buffer from the coarser one. Sets the
/// query `Ok` and returns `false` after the last step.
pub(crate) fn next(dataset: &Dataset, query: &mut Query) -> bool {
    if !query.can_next() {
        return false;
    }

    let cursor = query.end_cursor.unwrap_or(0);
    if cursor + 1 >= query.end_resolutions.len() {
        query.set_ok();
        return false;
    }

    let old_samples = query.logic_samples;
    let old_buffer = std::mem::take(&mut query.buffer);
    let filter_query = query.filter.query.take();
    let cur = query.cur_resolution;

    let end = query.end_resolutions[cursor + 1];
    if !set_end_resolution(dataset, query, end) {
        return fail(query, format!("cannot set end resolution {}", end));
    }
    query.end_cursor = Some(cursor + 1);
    query.allocate_buffer_if_needed();

    if old_buffer.valid() {
        let aborted = query.aborted.clone();
        if query.merge_mode == crate::MergeMode::Interpolate || dataset.missing_blocks() {
            interpolate_samples(
                &mut query.buffer,
                &query.logic_samples,
                &old_buffer,
                &old_samples,
                &aborted,
            );
        }
        insert_samples(
            &mut query.buffer,
            &query.logic_samples,
            &old_buffer,
            &old_samples,
            &aborted,
        );
        if aborted.is_aborted() {
            return fail(query, ABORTED_MESSAGE);
        }
    }

    query.filter.query = filter_query;
    query.cur_resolution = cur;

    true
}

/// Validates a created point query and positions it on its first end resolution.
pub(crate) fn begin_points(dataset: &Dataset, query: &mut PointQuery) -> bool {
    if query.status() != QueryStatus::Created {
        return query.is_running();
    }

    if query.aborted.is_aborted() {
        return fail_points(query, ABORTED_MESSAGE);
    }

    if let Err(message) = check_field_and_time(dataset, &mut query.field, query.time) {
        return fail_points(query, message);
    }

    let pdim = dataset.pdim();
    if query.points.is_empty() || query.points.iter().any(|p| p.pdim() != pdim) {
        return fail_points(query, "query points not valid");
    }

    if let Err(message) = check_end_resolutions(dataset, &mut query.end_resolutions) {
        return fail_points(query, message);
    }

    query.end_cursor = Some(0);
    query.set_running();
    tracing::debug!(?query, "point query running");

    true
}

/// Reads the sample of every point at the current end resolution.
///
/// A point is first snapped down to the lattice of levels `0..=end` by masking off its finer bits. Points sharing a block are
/// served by one block read.
pub(crate) fn execute_points(dataset: &Dataset, access: &mut dyn Access, query: &mut PointQuery) -> bool {
    if !query.can_execute() {
        return false;
    }
    if query.aborted.is_aborted() {
        return fail_points(query, ABORTED_MESSAGE);
    }

    let hzorder = dataset.hzorder();
    let bitsperblock = dataset.bitsperblock();
    let end = query.end_resolution() as usize;
    let depth_mask = hzorder.level_p2_included(end);
    let dataset_box = dataset.logic_box();

    let mut by_block: BTreeMap<u64, Vec<(usize, PointNi)>> = BTreeMap::new();
    for (i, p) in query.points.iter().enumerate() {
        let snapped = p.zip_map(&depth_mask, |x, mask| x & mask);
        if !dataset_box.contains(p) || !dataset_box.contains(&snapped) {
            continue;
        }
        let blockid = hzorder.address(&snapped) >> bitsperblock;
        by_block.entry(blockid).or_default().push((i, snapped));
    }
    let blocks: Vec<u64> = by_block.keys().copied().collect();
    tracing::debug!(nblocks = blocks.len(), end, "executing point query");

    query.allocate_buffer_if_needed();
    let field = query.field.clone();
    let aborted = query.aborted.clone();
    let sample_size = field.dtype.bytes_per_sample();
    let buffer = &mut query.buffer;

    let opened = open_session(access, IoMode::Read);
    let fetched = fetch_blocks(dataset, access, &field, query.time, &aborted, &blocks, |block| {
        let samples = &block.logic_samples;
        let stride = samples.nsamples.stride();
        let src = block.buffer();
        let dst = buffer.as_bytes_mut();
        for (i, p) in by_block.get(&block.blockid).into_iter().flatten() {
            let j = samples.logic_to_pixel(p).inner_product(&stride) as usize;
            if let Some(value) = src.as_bytes().get(j * sample_size..(j + 1) * sample_size) {
                dst[i * sample_size..(i + 1) * sample_size].copy_from_slice(value);
            }
        }
    });
    if opened {
        access.end_io();
    }

    if let Err(message) = fetched {
        return fail_points(query, message);
    }
    if query.aborted.is_aborted() {
        return fail_points(query, ABORTED_MESSAGE);
    }
    query.cur_resolution = end as i32;

    true
}

/// Moves a point query to its next end resolution. The buffer keeps the coarser samples until they are read again. Sets the
/// query `Ok` and returns `false` after the last step.
pub(crate) fn next_points(query: &mut PointQuery) -> bool {
    if !query.can_next() {
        return false;
    }

    let cursor = query.end_cursor.unwrap_or(0);
    if cursor + 1 >= query.end_resolutions.len() {
        query.set_ok();
        return false;
    }
    query.end_cursor = Some(cursor + 1);

    true
}

/// Reads level by level, running the inverse filter after each level so the next one starts from unfiltered samples.
fn execute_filtered(dataset: &Dataset, access: &mut dyn Access, query: &mut Query) -> bool {
    let filter = match query.filter.filter.clone() {
        Some(filter) => filter,
        None => return false,
    };

    let end = query.end_resolution() as usize;
    let start = (query.cur_resolution + 1) as usize;
    for h in start..=end {
        let logic_box = adjust_filter_box(
            filter.as_ref(),
            &query.filter.domain,
            &query.filter.adjusted_logic_box,
            h,
        );
        let mut level_query = Query::new(
            IoMode::Read,
            query.field.clone(),
            query.time,
            logic_box,
            query.filter.domain,
        )
        .end_resolutions(vec![h])
        .aborted(query.aborted.clone());

        if !begin(dataset, &mut level_query) {
            continue;
        }

        if let Some(previous) = query.filter.query.as_ref() {
            level_query.allocate_buffer_if_needed();
            insert_samples(
                &mut level_query.buffer,
                &level_query.logic_samples,
                &previous.buffer,
                &previous.logic_samples,
                &query.aborted,
            );
            if query.aborted.is_aborted() {
                return fail(query, ABORTED_MESSAGE);
            }
            level_query.cur_resolution = previous.cur_resolution;
        }

        if !execute(dataset, access, &mut level_query) {
            return fail(query, level_query.error_message());
        }
        if !filter.compute_filter(&mut level_query, true) {
            return fail(query, ABORTED_MESSAGE);
        }

        query.filter.query = Some(Box::new(level_query));
    }

    let (logic_samples, buffer) = match query.filter.query.as_ref() {
        Some(last) => (last.logic_samples, last.buffer.clone()),
        None => return fail(query, "filtered read found no samples"),
    };
    query.logic_samples = logic_samples;
    query.buffer = buffer;
    query.cur_resolution = end as i32;

    true
}

fn fail(query: &Query, message: impl Into<String>) -> bool {
    let message = message.into();
    tracing::debug!(%message, "query failed");
    query.set_failed(message);

    false
}

fn fail_points(query: &PointQuery, message: impl Into<String>) -> bool {
    let message = message.into();
    tracing::debug!(%message, "point query failed");
    query.set_failed(message);

    false
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::access::{RamAccess, RamCache};
    use crate::{AccessConfig, BaseType, DType, Field, IdxFile, MergeMode};

    use hzblocks_core::Bitmask;

    // 4x4 over V0101 with 2 bits per block: the four blocks of the `block` module docs.
    fn dataset() -> Dataset {
        let bx = BoxNi::new(PointNi::zero(2), PointNi::fill(2, 4));
        let idxfile = IdxFile::new(bx, vec![Field::new("data", DType::scalar(BaseType::U16))])
            .with_bitmask(Bitmask::from_pattern("V0101"))
            .with_bitsperblock(2);

        Dataset::from_idx_file(idxfile, ".", Default::default()).unwrap()
    }

    fn ram(dataset: &Dataset) -> RamAccess {
        RamAccess::new(
            dataset.bitsperblock(),
            RamCache::new(1 << 20).shared(),
            &AccessConfig::read_write(),
        )
    }

    fn full_box() -> BoxNi {
        BoxNi::new(PointNi::zero(2), PointNi::fill(2, 4))
    }

    fn ramp() -> Array {
        let mut buffer = Array::new(PointNi::fill(2, 4), DType::scalar(BaseType::U16));
        for (i, v) in buffer.as_mut_slice::<u16>().iter_mut().enumerate() {
            *v = i as u16;
        }
        buffer
    }

    fn write_ramp(dataset: &Dataset, access: &mut dyn Access) {
        let mut write = dataset
            .create_query(IoMode::Write)
            .logic_box(full_box())
            .with_buffer(ramp());
        assert!(begin(dataset, &mut write));
        assert!(execute(dataset, access, &mut write), "{}", write.error_message());
    }

    #[test]
    fn begin_rejects_bad_queries() {
        let dataset = dataset();

        let mut q = dataset.create_query(IoMode::Read).time(3.0);
        assert!(!begin(&dataset, &mut q));
        assert_eq!(q.error_message(), "wrong time");

        let outside = BoxNi::new(PointNi::fill(2, 8), PointNi::fill(2, 9));
        let mut q = dataset.create_query(IoMode::Read).logic_box(outside);
        assert!(!begin(&dataset, &mut q));
        assert_eq!(q.error_message(), "user_box not valid");

        let mut q = dataset.create_query(IoMode::Read).end_resolutions(vec![5]);
        assert!(!begin(&dataset, &mut q));
        assert!(q.error_message().starts_with("wrong end resolution"));

        let mut q = dataset
            .create_query(IoMode::Read)
            .field(Field::new("other", DType::scalar(BaseType::U16)));
        assert!(!begin(&dataset, &mut q));
        assert_eq!(q.error_message(), "field not valid");
    }

    #[test]
    fn lattice_of_each_end_resolution() {
        let dataset = dataset();
        let mut q = dataset.create_query(IoMode::Read);
        assert!(set_end_resolution(&dataset, &mut q, 2));
        assert_eq!(q.logic_samples.delta, PointNi::fill(2, 2));
        assert_eq!(q.nsamples(), PointNi::fill(2, 2));

        assert!(set_end_resolution(&dataset, &mut q, 3));
        assert_eq!(q.logic_samples.delta, PointNi::from_slice(&[1, 2]));
        assert_eq!(q.nsamples(), PointNi::from_slice(&[4, 2]));

        assert!(set_end_resolution(&dataset, &mut q, 4));
        assert_eq!(q.nsamples(), PointNi::fill(2, 4));
    }

    #[test]
    fn write_then_read_every_resolution() {
        let dataset = dataset();
        let mut access = ram(&dataset);
        write_ramp(&dataset, &mut access);
        assert_eq!(access.info().statistics.wok(), 4);

        let mut read = dataset
            .create_query(IoMode::Read)
            .end_resolutions(vec![2, 3, 4]);
        assert!(begin(&dataset, &mut read));

        assert!(execute(&dataset, &mut access, &mut read));
        assert_eq!(read.buffer.as_slice::<u16>(), &[0, 2, 8, 10]);
        assert!(next(&dataset, &mut read));

        assert!(execute(&dataset, &mut access, &mut read));
        assert_eq!(read.buffer.as_slice::<u16>(), &[0, 1, 2, 3, 8, 9, 10, 11]);
        assert!(next(&dataset, &mut read));

        assert!(execute(&dataset, &mut access, &mut read));
        assert_eq!(read.buffer, ramp());
        assert!(!next(&dataset, &mut read));
        assert!(read.ok());
    }

    #[test]
    fn progressive_read_only_fetches_new_blocks() {
        let dataset = dataset();
        let mut access = ram(&dataset);
        write_ramp(&dataset, &mut access);

        let mut read = dataset.create_query(IoMode::Read).resolution_range(2, 4);
        assert!(begin(&dataset, &mut read));
        assert!(execute(&dataset, &mut access, &mut read));
        assert_eq!(access.info().statistics.rok(), 1);
        assert!(next(&dataset, &mut read));
        assert!(execute(&dataset, &mut access, &mut read));

        // Blocks 1, 2 and 3 on top of block 0.
        assert_eq!(access.info().statistics.rok(), 4);
        assert_eq!(read.buffer, ramp());
    }

    #[test]
    fn partial_write_keeps_other_samples() {
        let dataset = dataset();
        let mut access = ram(&dataset);
        write_ramp(&dataset, &mut access);

        let corner = BoxNi::new(PointNi::zero(2), PointNi::fill(2, 2));
        let patch = Array::filled(PointNi::fill(2, 2), DType::scalar(BaseType::U16), 100.0);
        let mut write = dataset
            .create_query(IoMode::Write)
            .logic_box(corner)
            .with_buffer(patch);
        assert!(begin(&dataset, &mut write));
        assert!(execute(&dataset, &mut access, &mut write));

        let mut read = dataset.create_query(IoMode::Read);
        assert!(begin(&dataset, &mut read));
        assert!(execute(&dataset, &mut access, &mut read));
        let mut expected = ramp();
        for &i in &[0, 1, 4, 5] {
            expected.as_mut_slice::<u16>()[i] = 100;
        }
        assert_eq!(read.buffer, expected);
    }

    #[test]
    fn missing_block_fails_the_read() {
        let dataset = dataset();
        let mut access = ram(&dataset);

        let mut read = dataset.create_query(IoMode::Read);
        assert!(begin(&dataset, &mut read));
        assert!(!execute(&dataset, &mut access, &mut read));
        assert!(read.failed());
        assert!(read.error_message().contains("not in memory"));
    }

    #[test]
    fn interpolation_fills_the_new_samples() {
        let dataset = dataset();
        let mut access = ram(&dataset);
        write_ramp(&dataset, &mut access);

        let mut read = dataset
            .create_query(IoMode::Read)
            .resolution_range(2, 4)
            .merge_mode(MergeMode::Interpolate);
        assert!(begin(&dataset, &mut read));
        assert!(execute(&dataset, &mut access, &mut read));
        assert!(next(&dataset, &mut read));

        // Before the finer blocks arrive, each sample holds its coarser neighbour.
        assert_eq!(
            read.buffer.as_slice::<u16>(),
            &[0, 0, 2, 2, 0, 0, 2, 2, 8, 8, 10, 10, 8, 8, 10, 10]
        );
    }

    #[test]
    fn point_query_snaps_to_each_end_resolution() {
        let dataset = dataset();
        let mut access = ram(&dataset);
        write_ramp(&dataset, &mut access);
        let before = access.info().statistics.rok();

        let points = vec![
            PointNi::from_slice(&[1, 2]),
            PointNi::from_slice(&[3, 3]),
            PointNi::from_slice(&[0, 0]),
            PointNi::from_slice(&[5, 0]),
        ];
        let mut query = dataset.create_point_query(points).end_resolutions(vec![2, 4]);
        assert!(begin_points(&dataset, &mut query));

        // Level 2 keeps the even coordinates, all in block 0.
        assert!(execute_points(&dataset, &mut access, &mut query));
        assert_eq!(query.buffer.as_slice::<u16>(), &[8, 10, 0, 0]);
        assert_eq!(access.info().statistics.rok() - before, 1);
        assert!(next_points(&mut query));

        assert!(execute_points(&dataset, &mut access, &mut query));
        assert_eq!(query.buffer.as_slice::<u16>(), &[9, 15, 0, 0]);
        assert_eq!(access.info().statistics.rok() - before, 4);
        assert!(!next_points(&mut query));
        assert!(query.ok());
    }

    #[test]
    fn point_query_rejects_bad_points() {
        let dataset = dataset();

        let mut empty = dataset.create_point_query(Vec::new());
        assert!(!begin_points(&dataset, &mut empty));
        assert_eq!(empty.error_message(), "query points not valid");

        let mut flat = dataset.create_point_query(vec![PointNi::zero(3)]);
        assert!(!begin_points(&dataset, &mut flat));

        let mut late = dataset.create_point_query(vec![PointNi::zero(2)]).time(1.0);
        assert!(!begin_points(&dataset, &mut late));
        assert_eq!(late.error_message(), "wrong time");
    }

    #[test]
    fn point_query_fails_on_missing_blocks() {
        let dataset = dataset();
        let mut access = ram(&dataset);

        let mut query = dataset.create_point_query(vec![PointNi::from_slice(&[3, 3])]);
        assert!(begin_points(&dataset, &mut query));
        assert!(!execute_points(&dataset, &mut access, &mut query));
        assert!(query.error_message().contains("not in memory"));
    }

    #[test]
    fn write_needs_a_matching_buffer() {
        let dataset = dataset();
        let mut access = ram(&dataset);

        let mut write = dataset.create_query(IoMode::Write);
        assert!(begin(&dataset, &mut write));
        assert!(!execute(&dataset, &mut access, &mut write));
        assert_eq!(write.error_message(), "write buffer not set");
    }
}
