// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Raytracing of *recirculation surfaces*: the set of points of a 3D
//! time-dependent flow whose pathline, started at time `t0` and integrated for a
//! duration `tau`, returns to its starting point.
//!
//! The pipeline is: a [`camera::PerspectiveCamera`] casts rays; a
//! [`surface::RecSurface`] sweeps each ray through the flow's domain in short
//! segments, decorating them with integrated pathlines ([`hyper`]); inside each
//! segment, roots of the flow-return field are extracted by recursive
//! subdivision of 5D cells ([`cuboid`], [`extract`]); the per-pixel results are
//! committed to a resumable [`progress::ProgressStore`] and colorized into
//! `t0`/`tau` textures by the [`render`] passes; finally [`shade`] adds normals,
//! shadows and shadow sharpening that reuse the already-computed primary rays.

#![allow(clippy::collapsible_if)]
#![warn(clippy::cast_lossless)]

pub mod camera;
pub mod colormap;
pub mod config;
pub mod cuboid;
pub mod extract;
pub mod flow;
pub mod hyper;
pub mod integrate;
pub mod math;
pub mod objects;
pub mod progress;
pub mod raycast;
pub mod render;
pub mod scene;
pub mod shade;
pub mod surface;
pub mod texture;
