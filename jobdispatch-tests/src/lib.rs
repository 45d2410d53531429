// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod gate;
pub mod host_loop;
pub mod recorder;
