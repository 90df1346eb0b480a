// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Resumable store of per-pixel search results.
//!
//! Results may arrive in any order (the render workers race), but the store
//! commits them to `saved` strictly in camera-scan order, which makes the
//! persistent format deterministic and allows an interrupted render to resume
//! from `start_index`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use thiserror::Error;

use crate::camera::PerspectiveCamera;
use crate::surface::{RecPoint, RSIntersection};

const START_FILE: &str = "progress_start.txt";
const POINTS_FILE: &str = "progress_points.txt";

/// Sentinel of `index_map` slots with no committed entry.
const EMPTY: usize = usize::MAX;

/// Errors loading the progress sidecar files. All of them are recoverable by
/// recomputing from scratch.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("i/o error reading progress files")]
    Io(#[from] io::Error),
    #[error("unparseable value in progress file")]
    Parse,
}

/// Maps pixel index → search result, in strictly ascending `cam_index` order,
/// with a durable sidecar.
///
/// Writers hand results to [`ProgressStore::update`] as they finish; entries at
/// or above `start_index` wait in a priority buffer until all their
/// predecessors arrived, entries below `start_index` back-patch the committed
/// list (used by the post-processing pass).
pub struct ProgressStore {
    width: usize,
    height: usize,
    start_index: usize,
    saved: Vec<RSIntersection>,
    waiting: BinaryHeap<Reverse<RSIntersection>>,
    count_waiting_positives: usize,
    /// First `saved` position not yet written to the sidecar.
    next_save_index: usize,
    /// Set when committed entries changed behind `next_save_index`, forcing a
    /// full rewrite on the next save.
    complete_rewrite: bool,
    /// Flat `width · height` map from pixel to `saved` position.
    index_map: Vec<usize>,
}

impl ProgressStore {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            start_index: 0,
            saved: Vec::new(),
            waiting: BinaryHeap::new(),
            count_waiting_positives: 0,
            next_save_index: 0,
            complete_rewrite: false,
            index_map: vec![EMPTY; width * height],
        }
    }

    /// The first pixel index that has not been committed yet; a resumed render
    /// starts here.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// All committed results, ascending in `cam_index`.
    pub fn saved_points(&self) -> &[RSIntersection] {
        &self.saved
    }

    /// Number of recirculation points known so far (committed or waiting).
    pub fn points_found(&self) -> usize {
        self.saved.len() + self.count_waiting_positives
    }

    /// The committed result for pixel `(x, y)`, if any. Out-of-range
    /// coordinates yield [`None`], which keeps neighbor lookups at the image
    /// border trivial.
    pub fn get(&self, x: i64, y: i64) -> Option<&RSIntersection> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        let slot = self.index_map[y as usize * self.width + x as usize];
        if slot == EMPTY {
            None
        } else {
            Some(&self.saved[slot])
        }
    }

    /// The committed result for a scan-order pixel index, if any.
    pub fn get_index(&self, cam_index: usize) -> Option<&RSIntersection> {
        self.get(
            (cam_index % self.width) as i64,
            (cam_index / self.width) as i64,
        )
    }

    /// Inserts or updates one pixel's result.
    ///
    /// Results with `cam_index >= start_index` are buffered and committed once
    /// contiguous; results below `start_index` that carry a recirculation point
    /// replace or splice into the committed list (marking the sidecar for a
    /// full rewrite).
    pub fn update(&mut self, data: RSIntersection) {
        if data.cam_index >= self.start_index {
            if data.rp.is_some() {
                self.count_waiting_positives += 1;
            }
            self.waiting.push(Reverse(data));
            while self
                .waiting
                .peek()
                .map(|Reverse(e)| e.cam_index == self.start_index)
                .unwrap_or(false)
            {
                let Reverse(entry) = self.waiting.pop().unwrap();
                if entry.rp.is_some() {
                    self.count_waiting_positives -= 1;
                    self.index_map[entry.cam_index] = self.saved.len();
                    self.saved.push(entry);
                }
                self.start_index += 1;
            }
        } else if data.rp.is_some() {
            self.complete_rewrite = true;
            let slot = self.index_map[data.cam_index];
            if slot != EMPTY {
                self.saved[slot] = data;
            } else {
                let insert_pos = self
                    .saved
                    .partition_point(|p| p.cam_index < data.cam_index);
                self.index_map[data.cam_index] = insert_pos;
                self.saved.insert(insert_pos, data);
                for moved in insert_pos + 1..self.saved.len() {
                    self.index_map[self.saved[moved].cam_index] = moved;
                }
            }
        }
        // An update below start_index without a point would mean deleting an
        // entry, which nothing in the pipeline does.
    }

    /// Writes the sidecar files. Appends committed entries not yet on disk, or
    /// rewrites the whole file after back-patching.
    pub fn save(&mut self, dir: &Path) -> io::Result<()> {
        let points_path = dir.join(POINTS_FILE);
        let mut file;
        let start;
        if self.complete_rewrite {
            file = fs::File::create(&points_path)?;
            start = 0;
        } else {
            file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&points_path)?;
            start = self.next_save_index;
        }
        for entry in &self.saved[start..] {
            let rp = entry.rp.as_ref().expect("committed entry without a point");
            writeln!(
                file,
                "{} {} {} {}",
                entry.cam_index,
                entry.hit.expect("committed entry without a hit"),
                rp.t0,
                rp.tau
            )?;
        }
        file.flush()?;
        self.next_save_index = self.saved.len();
        self.complete_rewrite = false;

        fs::write(dir.join(START_FILE), format!("{}", self.start_index))?;
        Ok(())
    }

    /// Restores the store from the sidecar files, reconstructing rays and
    /// positions through the camera.
    ///
    /// Missing files leave the store empty (a fresh run). A truncated final
    /// record (the typical result of an interrupted save) is discarded, and
    /// `start_index` is pulled back to the last surviving entry.
    pub fn load(&mut self, dir: &Path, cam: &PerspectiveCamera) -> Result<(), SidecarError> {
        self.start_index = 0;
        self.saved.clear();
        self.waiting.clear();
        self.count_waiting_positives = 0;

        match fs::read_to_string(dir.join(START_FILE)) {
            Ok(content) => {
                self.start_index = content.trim().parse().map_err(|_| SidecarError::Parse)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut dropped_last_point = false;
        match fs::read_to_string(dir.join(POINTS_FILE)) {
            Ok(content) => {
                let tokens: Vec<&str> = content.split_whitespace().collect();
                for record in tokens.chunks(4) {
                    if record.len() < 4 {
                        // The writer was interrupted mid-record.
                        dropped_last_point = true;
                        break;
                    }
                    let cam_index: usize =
                        record[0].parse().map_err(|_| SidecarError::Parse)?;
                    let hit: f64 = record[1].parse().map_err(|_| SidecarError::Parse)?;
                    let t0: f64 = record[2].parse().map_err(|_| SidecarError::Parse)?;
                    let tau: f64 = record[3].parse().map_err(|_| SidecarError::Parse)?;
                    let ray = cam.ray_for_index(cam_index);
                    let pos = ray.evaluate(hit);
                    self.saved.push(RSIntersection {
                        cam_index,
                        ray,
                        hit: Some(hit),
                        rp: Some(RecPoint { pos, t0, tau }),
                    });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // An interrupted run may leave the record file ahead of the start file
        // (or a half-written record). Drop the suspect final record and resume
        // from the last one known good; that one is dropped as well, because
        // the rerun will recompute it and committing twice would duplicate its
        // cam_index in the sidecar.
        if self
            .saved
            .last()
            .map(|p| p.cam_index >= self.start_index)
            .unwrap_or(false)
        {
            if !dropped_last_point {
                self.saved.pop();
            }
            self.start_index = self.saved.last().map(|p| p.cam_index).unwrap_or(0);
            if self
                .saved
                .last()
                .map(|p| p.cam_index == self.start_index)
                .unwrap_or(false)
            {
                self.saved.pop();
            }
        }

        self.next_save_index = self.saved.len();
        self.complete_rewrite = false;
        for slot in self.index_map.iter_mut() {
            *slot = EMPTY;
        }
        for (i, entry) in self.saved.iter().enumerate() {
            self.index_map[entry.cam_index] = i;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CamUp;
    use cgmath::{InnerSpace as _, Point3};

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 0.0),
            60.0,
            4,
            3,
            CamUp::Y,
        )
    }

    fn hit_result(cam: &PerspectiveCamera, cam_index: usize, hit: f64) -> RSIntersection {
        let ray = cam.ray_for_index(cam_index);
        RSIntersection {
            cam_index,
            ray,
            hit: Some(hit),
            rp: Some(RecPoint {
                pos: ray.evaluate(hit),
                t0: 1.5,
                tau: 2.5,
            }),
        }
    }

    fn miss_result(cam: &PerspectiveCamera, cam_index: usize) -> RSIntersection {
        RSIntersection::empty(cam_index, cam.ray_for_index(cam_index))
    }

    fn assert_strictly_ascending(store: &ProgressStore) {
        let saved = store.saved_points();
        for pair in saved.windows(2) {
            assert!(pair[0].cam_index < pair[1].cam_index);
        }
    }

    #[test]
    fn in_order_updates_commit_immediately() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 0, 2.0));
        store.update(miss_result(&cam, 1));
        store.update(hit_result(&cam, 2, 3.0));
        assert_eq!(store.start_index(), 3);
        assert_eq!(store.saved_points().len(), 2);
        assert!(store.get(0, 0).is_some());
        assert!(store.get(1, 0).is_none());
        assert_strictly_ascending(&store);
    }

    #[test]
    fn out_of_order_updates_wait_for_predecessors() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 2, 3.0));
        store.update(hit_result(&cam, 1, 2.0));
        assert_eq!(store.start_index(), 0);
        assert_eq!(store.saved_points().len(), 0);
        assert_eq!(store.points_found(), 2);

        store.update(miss_result(&cam, 0));
        assert_eq!(store.start_index(), 3);
        assert_eq!(store.saved_points().len(), 2);
        assert_eq!(store.points_found(), 2);
        assert_strictly_ascending(&store);
    }

    #[test]
    fn neighbor_lookup_is_bounds_checked() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 0, 2.0));
        assert!(store.get(-1, 0).is_none());
        assert!(store.get(0, -1).is_none());
        assert!(store.get(4, 0).is_none());
        assert!(store.get(0, 3).is_none());
    }

    #[test]
    fn backpatch_replaces_existing_entry() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        for i in 0..6 {
            store.update(hit_result(&cam, i, 2.0));
        }
        let before = store.saved_points().len();
        store.update(hit_result(&cam, 3, 1.0));
        assert_eq!(store.saved_points().len(), before);
        assert_eq!(store.get_index(3).unwrap().hit, Some(1.0));
        assert_strictly_ascending(&store);
    }

    #[test]
    fn backpatch_splices_new_entry() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 0, 2.0));
        store.update(miss_result(&cam, 1));
        store.update(hit_result(&cam, 2, 2.0));
        let before = store.saved_points().len();

        // Pixel 1 was committed as a miss; post-processing found a point there.
        store.update(hit_result(&cam, 1, 4.0));
        assert_eq!(store.saved_points().len(), before + 1);
        assert_eq!(store.get_index(1).unwrap().hit, Some(4.0));
        // The index map still matches every committed entry.
        for entry in store.saved_points() {
            assert_eq!(
                store.get_index(entry.cam_index).unwrap().cam_index,
                entry.cam_index
            );
        }
        assert_strictly_ascending(&store);
    }

    #[test]
    fn save_load_round_trip() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::new(4, 3);
        for i in 0..5 {
            if i % 2 == 0 {
                store.update(hit_result(&cam, i, 2.0 + i as f64));
            } else {
                store.update(miss_result(&cam, i));
            }
        }
        store.save(dir.path()).unwrap();

        let mut restored = ProgressStore::new(4, 3);
        restored.load(dir.path(), &cam).unwrap();
        assert_eq!(restored.start_index(), store.start_index());
        assert_eq!(restored.saved_points().len(), store.saved_points().len());
        for (a, b) in restored.saved_points().iter().zip(store.saved_points()) {
            assert_eq!(a.cam_index, b.cam_index);
            let (rp_a, rp_b) = (a.rp.as_ref().unwrap(), b.rp.as_ref().unwrap());
            assert!((rp_a.t0 - rp_b.t0).abs() < 1e-12);
            assert!((rp_a.tau - rp_b.tau).abs() < 1e-12);
            assert!((rp_a.pos - rp_b.pos).magnitude() < 1e-9);
        }
    }

    #[test]
    fn incremental_save_appends_without_duplicates() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 0, 2.0));
        store.save(dir.path()).unwrap();
        store.update(hit_result(&cam, 1, 2.0));
        store.update(hit_result(&cam, 2, 2.0));
        store.save(dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join(POINTS_FILE)).unwrap();
        let indices: Vec<&str> = content
            .lines()
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(indices, ["0", "1", "2"]);
    }

    #[test]
    fn truncated_final_record_is_discarded() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::new(4, 3);
        for i in 0..4 {
            store.update(hit_result(&cam, i, 2.0));
        }
        store.save(dir.path()).unwrap();

        // Simulate an interrupted write of a fifth record.
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(POINTS_FILE))
            .unwrap();
        write!(file, "4 2.0").unwrap();
        drop(file);

        let mut restored = ProgressStore::new(4, 3);
        restored.load(dir.path(), &cam).unwrap();
        // The partial record is gone; the complete ones and the start index
        // survive, so the interrupted pixel is recomputed.
        assert_eq!(restored.saved_points().len(), 4);
        assert_eq!(restored.start_index(), 4);
        assert!(restored.get_index(4).is_none());
    }

    #[test]
    fn stale_start_file_resumes_without_duplicates() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::new(4, 3);
        for i in 0..4 {
            store.update(hit_result(&cam, i, 2.0));
        }
        store.save(dir.path()).unwrap();
        // The interruption hit between writing the record file and the start
        // file: the start file claims less progress than the records show.
        fs::write(dir.path().join(START_FILE), "2").unwrap();

        let mut restored = ProgressStore::new(4, 3);
        restored.load(dir.path(), &cam).unwrap();
        let resume_from = restored.start_index();
        assert!(resume_from < 4);
        // Recomputing from the resume point must not duplicate any cam_index.
        for i in resume_from..6 {
            restored.update(hit_result(&cam, i, 9.0));
        }
        assert_strictly_ascending(&restored);
        let mut seen = std::collections::BTreeSet::new();
        for p in restored.saved_points() {
            assert!(seen.insert(p.cam_index), "duplicate {}", p.cam_index);
        }
    }

    #[test]
    fn missing_files_leave_a_fresh_store() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::new(4, 3);
        store.load(dir.path(), &cam).unwrap();
        assert_eq!(store.start_index(), 0);
        assert!(store.saved_points().is_empty());
    }

    #[test]
    fn corrupt_file_reports_error() {
        let cam = camera();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(POINTS_FILE), "0 not-a-number 1 2\n").unwrap();
        let mut store = ProgressStore::new(4, 3);
        assert!(matches!(
            store.load(dir.path(), &cam),
            Err(SidecarError::Parse)
        ));
    }

    #[test]
    fn points_found_includes_waiting() {
        let cam = camera();
        let mut store = ProgressStore::new(4, 3);
        store.update(hit_result(&cam, 5, 2.0));
        assert_eq!(store.points_found(), 1);
        assert_eq!(store.saved_points().len(), 0);
    }
}
