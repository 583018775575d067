/**
 * Drivers that walk the filesystem against the core's
 *  contracts: the archiver turns directory trees into
 *  snapshots, the restorer turns snapshots back into
 *  directory trees.
 */
pub mod archiver;
pub mod restorer;
