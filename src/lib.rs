/*
 *  lib.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

pub mod config;
pub mod controller;
pub mod deutils;
pub mod frontend;
pub mod maintenance;
pub mod manifest;
pub mod reconciler;
pub mod remote;
pub mod renderer;
pub mod seed;

pub use controller::{Controller, ControllerConfig, ControllerEvent};
pub use frontend::{DisplayMode, DisplayState, FrontendCommand, FrontendEvent, FrontendLink};
pub use manifest::Manifest;
pub use remote::{RemoteClient, RemoteEvent, SettingValue};
