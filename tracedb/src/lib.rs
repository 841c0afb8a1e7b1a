// Life of a write:
// 1. A record arrives at a database (`db`)
// 2. The database takes its lock and assigns ids / versions
// 3. The B-tree descends from page 0, splitting full nodes on the way
// 4. Every touched node is re-encoded and written back through `Storage`
//
// System components:
//  - Page storage (file or memory)
//  - Generic B-tree over fixed-layout records
//  - Trace and project databases on top

pub mod config;
pub mod db;
pub mod records;
pub mod storage;
pub mod time;

#[cfg(test)]
mod simulation;
#[cfg(test)]
mod testing;
