/*
 * Mass Storage Drivers
 */

pub mod ide;
