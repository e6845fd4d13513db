use super::{Access, AccessInfo, AccessStatistics};
use crate::{Array, BlockQuery, Field, IoMode, SharedBlockQuery, ABORTED_MESSAGE};

/// Reads through a list of accesses, first to last.
///
/// The first child that has the block answers, and the block is then written into every writable child before it, so a fast
/// access placed in front of a slow one fills up as blocks are read. Writes are not supported: write to a child directly.
pub struct MultiplexAccess {
    info: AccessInfo,
    children: Vec<Box<dyn Access>>,
}

impl MultiplexAccess {
    pub fn new(children: Vec<Box<dyn Access>>) -> Self {
        let names: Vec<&str> = children.iter().map(|c| c.info().name.as_str()).collect();
        let name = format!("multiplex({})", names.join(","));
        let bitsperblock = children
            .iter()
            .map(|c| c.info().bitsperblock)
            .min()
            .unwrap_or(0);

        let mut info = AccessInfo::new(name.clone(), bitsperblock);
        info.can_read = true;
        info.can_write = false;
        info.statistics = AccessStatistics::new(name, false);

        Self { info, children }
    }

    pub fn children(&self) -> &[Box<dyn Access>] {
        &self.children
    }

    /// Writes a block some later child found into child `index`. A failed copy only costs a later miss.
    fn cache_block(&mut self, index: usize, query: &BlockQuery, buffer: &Array) {
        let child = &mut self.children[index];
        let write = BlockQuery::new(
            query.field.clone(),
            query.time,
            IoMode::Write,
            query.blockid,
            query.logic_samples,
            query.aborted.clone(),
        )
        .shared();
        write.set_buffer(buffer.clone());
        write.set_running();
        child.write_block(write.clone());
        child.flush();
        write.completion().wait();

        if write.failed() {
            tracing::debug!(
                access = %child.info().name,
                blockid = query.blockid,
                reason = %write.error_message(),
                "could not cache block"
            );
        }
    }
}

impl Access for MultiplexAccess {
    fn info(&self) -> &AccessInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut AccessInfo {
        &mut self.info
    }

    fn read_block(&mut self, query: SharedBlockQuery) {
        if !self.info.check_can_read(&query) {
            return;
        }

        let mut reasons = Vec::new();
        for index in 0..self.children.len() {
            if query.aborted.is_aborted() {
                self.info.statistics.read_failed(&query, ABORTED_MESSAGE);
                return;
            }
            if !self.children[index].info().can_read {
                continue;
            }

            let attempt = BlockQuery::new(
                query.field.clone(),
                query.time,
                IoMode::Read,
                query.blockid,
                query.logic_samples,
                query.aborted.clone(),
            )
            .shared();
            attempt.set_running();
            let child = &mut self.children[index];
            child.read_block(attempt.clone());
            child.flush();
            attempt.completion().wait();

            if attempt.failed() {
                reasons.push(format!("{}: {}", child.info().name, attempt.error_message()));
                continue;
            }

            let buffer = attempt.take_buffer();
            for earlier in 0..index {
                if self.children[earlier].info().can_write {
                    self.cache_block(earlier, &query, &buffer);
                }
            }
            query.set_buffer(buffer);
            self.info.statistics.read_ok(&query);
            return;
        }

        let message = if reasons.is_empty() {
            format!("no access of {} can read", self.info.name)
        } else {
            reasons.join("; ")
        };
        self.info.statistics.read_failed(&query, message);
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        self.info.check_can_write(&query);
    }

    fn begin_io(&mut self, mode: IoMode) {
        debug_assert!(self.info.mode.is_none(), "begin_io inside an open session");
        for child in self.children.iter_mut() {
            child.begin_io(mode);
        }
        self.info.mode = Some(mode);
    }

    fn end_io(&mut self) {
        for child in self.children.iter_mut() {
            child.end_io();
        }
        self.info.mode = None;
    }

    fn flush(&mut self) {
        for child in self.children.iter_mut() {
            child.flush();
        }
    }

    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String {
        match self.children.last() {
            Some(child) => child.filename(field, time, blockid),
            None => format!("multiplex://{}/{}/{:x}", field.name, time, blockid),
        }
    }
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
    use crate::{Aborted, AccessConfig, BaseType, DType};

    use hzblocks_core::{BoxNi, LogicSamples, PointNi};

    fn block(blockid: u64, mode: IoMode) -> SharedBlockQuery {
        let samples = LogicSamples::new(
            BoxNi::new(PointNi::zero(1), PointNi::fill(1, 4)),
            PointNi::one(1),
        );

        BlockQuery::new(
            Field::new("data", DType::scalar(BaseType::U8)),
            0.0,
            mode,
            blockid,
            samples,
            Aborted::new(),
        )
        .shared()
    }

    fn ram(config: &AccessConfig) -> Box<dyn Access> {
        Box::new(RamAccess::new(2, RamCache::new(1 << 20).shared(), config))
    }

    fn read(access: &mut dyn Access, blockid: u64) -> SharedBlockQuery {
        let query = block(blockid, IoMode::Read);
        query.set_running();
        access.read_block(query.clone());
        query
    }

    #[test]
    fn later_child_answers_and_fills_earlier_ones() {
        let mut back = ram(&AccessConfig::read_write());
        let stored = block(3, IoMode::Write);
        stored.set_buffer(Array::filled(PointNi::fill(1, 4), DType::scalar(BaseType::U8), 9.0));
        stored.set_running();
        back.write_block(stored);

        let mut access = MultiplexAccess::new(vec![ram(&AccessConfig::read_write()), back]);
        assert_eq!(access.info().name, "multiplex(ram,ram)");
        access.begin_io(IoMode::Read);

        let first = read(&mut access, 3);
        assert!(first.ok());
        assert_eq!(first.buffer().as_slice::<u8>(), &[9, 9, 9, 9]);
        assert_eq!(access.children()[0].info().statistics.rfail(), 1);
        assert_eq!(access.children()[0].info().statistics.wok(), 1);

        let second = read(&mut access, 3);
        assert!(second.ok());
        assert_eq!(access.children()[0].info().statistics.rok(), 1);
        assert_eq!(access.children()[1].info().statistics.rok(), 1);
        access.end_io();
    }

    #[test]
    fn read_only_children_are_not_filled() {
        let mut back = ram(&AccessConfig::read_write());
        let stored = block(1, IoMode::Write);
        stored.allocate_buffer_if_needed();
        stored.set_running();
        back.write_block(stored);

        let mut access = MultiplexAccess::new(vec![ram(&AccessConfig::read_only()), back]);
        assert!(read(&mut access, 1).ok());
        assert_eq!(access.children()[0].info().statistics.wok(), 0);
        assert_eq!(access.children()[0].info().statistics.wfail(), 0);
    }

    #[test]
    fn fails_when_no_child_has_the_block() {
        let mut access = MultiplexAccess::new(vec![
            ram(&AccessConfig::read_write()),
            ram(&AccessConfig::read_write()),
        ]);
        let query = read(&mut access, 5);

        assert!(query.failed());
        assert!(query.error_message().contains("ram: block 5 is not in memory"));
        assert_eq!(access.info().statistics.rfail(), 1);

        let write = block(5, IoMode::Write);
        write.set_running();
        access.write_block(write.clone());
        assert!(write.failed());
    }
}
