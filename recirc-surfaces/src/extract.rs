// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Extraction of critical elements (roots of the flow-return field) from a
//! [`VectorCuboid`] by recursive subdivision.

use std::collections::VecDeque;

use cgmath::{InnerSpace as _, Vector3};

use crate::cuboid::VectorCuboid;
use crate::math::FreeCoordinate;

/// Parameters of the recursive search.
///
/// * `search_precision`: cell diagonal below which a sign-changing cell is
///   reported as an isolated critical point.
/// * `jacobi_precision`: edge length below which the Jacobian test runs (once
///   per branch).
/// * `cluster_precision`: distance below which two reported centers are
///   treated as the same element (the first one is retained).
/// * `max_steps`: absolute cap on processed cells; partial results are
///   returned when it is hit.
/// * `continue_past_structures`: when set, a branch classified as an extended
///   structure keeps subdividing instead of stopping, so isolated points next
///   to a structure can still be found. The cells of the structure itself then
///   reach `search_precision` and are enumerated as (clustered) points, bounded
///   by `max_steps`; the flag is off by default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CritSearchParams {
    pub search_precision: FreeCoordinate,
    pub jacobi_precision: FreeCoordinate,
    pub cluster_precision: FreeCoordinate,
    pub max_steps: usize,
    pub continue_past_structures: bool,
}

impl Default for CritSearchParams {
    fn default() -> Self {
        Self {
            search_precision: (2.0f64).powi(-40),
            jacobi_precision: (2.0f64).powi(-12),
            cluster_precision: (2.0f64).powi(-38),
            max_steps: 8usize.pow(7),
            continue_past_structures: false,
        }
    }
}

/// A single critical element in root-relative cell coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CritElement {
    /// An isolated root.
    Point(Vector3<FreeCoordinate>),
    /// The center of a cell belonging to an extended (non-isolated) structure
    /// of roots.
    Structure(Vector3<FreeCoordinate>),
}

/// All critical elements found in one cell, in root-relative coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CritElements {
    pub points: Vec<Vector3<FreeCoordinate>>,
    pub structures: Vec<Vector3<FreeCoordinate>>,
}

impl CritElements {
    pub fn contains_points(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn contains_structures(&self) -> bool {
        !self.structures.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.structures.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    /// Union of two result sets with the same clustering applied afterwards, so
    /// that duplicates across the sets are merged exactly like duplicates
    /// within one search.
    pub fn merged(&self, other: &CritElements, cluster_precision: FreeCoordinate) -> CritElements {
        let mut result = CritElements::default();
        for p in self.points.iter().chain(&other.points) {
            cluster_insert(&mut result.points, *p, cluster_precision);
        }
        for s in self.structures.iter().chain(&other.structures) {
            cluster_insert(&mut result.structures, *s, cluster_precision);
        }
        result
    }
}

/// Inserts `candidate` unless an element within `precision` already exists.
/// Returns whether it was inserted.
fn cluster_insert(
    list: &mut Vec<Vector3<FreeCoordinate>>,
    candidate: Vector3<FreeCoordinate>,
    precision: FreeCoordinate,
) -> bool {
    if list
        .iter()
        .any(|&existing| (existing - candidate).magnitude() <= precision)
    {
        return false;
    }
    list.push(candidate);
    true
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SearchMode {
    All,
    FirstAny,
    FirstPoint,
    FirstStructure,
}

/// Finds roots of the flow-return field inside a [`VectorCuboid`].
///
/// The extractor is immutable during a search; it may be shared freely between
/// threads operating on distinct cuboids.
#[derive(Clone, Debug)]
pub struct CritExtractor {
    params: CritSearchParams,
    det_min: FreeCoordinate,
}

impl CritExtractor {
    pub fn new(params: CritSearchParams, det_min: FreeCoordinate) -> Self {
        Self { params, det_min }
    }

    pub fn params(&self) -> &CritSearchParams {
        &self.params
    }

    /// The full list of critical elements of the cell.
    pub fn crit_elements(&self, cube: &VectorCuboid) -> CritElements {
        self.search(cube, SearchMode::All)
    }

    /// Whether the cell contains any critical element.
    pub fn has_crit_elements(&self, cube: &VectorCuboid) -> bool {
        self.first_crit_element(cube).is_some()
    }

    /// The first critical element found, if any (early exit).
    pub fn first_crit_element(&self, cube: &VectorCuboid) -> Option<CritElement> {
        let found = self.search(cube, SearchMode::FirstAny);
        found
            .points
            .first()
            .copied()
            .map(CritElement::Point)
            .or_else(|| found.structures.first().copied().map(CritElement::Structure))
    }

    /// Whether the cell contains an isolated critical point.
    ///
    /// If the cell also contains an extended critical structure, isolated
    /// points next to it may be missed, because the search aborts early in the
    /// branch holding the structure (unless
    /// [`CritSearchParams::continue_past_structures`] is set).
    pub fn has_crit_point(&self, cube: &VectorCuboid) -> bool {
        self.search(cube, SearchMode::FirstPoint).contains_points()
    }

    /// Whether the cell contains an extended critical structure.
    pub fn has_crit_structure(&self, cube: &VectorCuboid) -> bool {
        self.search(cube, SearchMode::FirstStructure)
            .contains_structures()
    }

    fn search(&self, cube: &VectorCuboid, mode: SearchMode) -> CritElements {
        struct Node {
            cube: VectorCuboid,
            passed_jacobian: bool,
        }

        let params = &self.params;
        let mut found = CritElements::default();
        let mut queue = VecDeque::new();
        queue.push_back(Node {
            cube: cube.clone(),
            passed_jacobian: false,
        });

        let mut steps = 0usize;
        while let Some(node) = queue.pop_front() {
            if steps >= params.max_steps {
                log::debug!(
                    "critical-element search hit the step cap ({}); returning partial results",
                    params.max_steps
                );
                break;
            }
            steps += 1;

            if node.cube.signs_uniform() {
                continue;
            }

            if node.cube.diagonal() < params.search_precision {
                let inserted =
                    cluster_insert(&mut found.points, node.cube.center(), params.cluster_precision);
                if inserted
                    && matches!(mode, SearchMode::FirstAny | SearchMode::FirstPoint)
                {
                    return found;
                }
                continue;
            }

            let mut passed_jacobian = node.passed_jacobian;
            if !passed_jacobian && node.cube.max_edge() < params.jacobi_precision {
                passed_jacobian = true;
                if node.cube.jacobian_determinant().abs() < self.det_min {
                    let inserted = cluster_insert(
                        &mut found.structures,
                        node.cube.center(),
                        params.cluster_precision,
                    );
                    if inserted
                        && matches!(mode, SearchMode::FirstAny | SearchMode::FirstStructure)
                    {
                        return found;
                    }
                    if !params.continue_past_structures {
                        continue;
                    }
                }
            }

            for child in node.cube.subdivide() {
                queue.push_back(Node {
                    cube: child,
                    passed_jacobian,
                });
            }
        }
        found
    }
}
