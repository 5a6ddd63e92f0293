// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All statistics are done in double precision. Views carrying lower-precision
data must be promoted before they're handed to the flagger.
 */

/// Multiply a median absolute deviation by this to get an estimate of the
/// standard deviation of normally-distributed data.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// The number of iterations the flagger runs if not otherwise specified.
pub const DEFAULT_NITER: usize = 1;

/// Rules are skipped on views that are entirely flagged unless told otherwise.
pub const DEFAULT_SKIP_FULLY_FLAGGED: bool = true;

/// The number of channel quadrants used by the "bad quadrant" rule.
pub const NUM_QUADRANTS: usize = 4;

/// When "sharps" are broadened, neighbouring channels continue to be flagged
/// while their derivative exceeds this multiple of the median derivative.
pub const SHARPS_WING_FACTOR: f64 = 2.0;

/// The polarisations that, when all flagged with otherwise-identical
/// selections, are merged into a single all-polarisation flag command.
pub const DEFAULT_POLARISATIONS: [&str; 2] = ["XX", "YY"];
